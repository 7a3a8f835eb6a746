//! Error types for Palimpsest.
//!
//! All fallible operations return [`Result`], backed by [`PalimpsestError`].
//!
//! # Error Handling Philosophy
//!
//! **System errors MUST always bubble up unchanged:**
//! - `PalimpsestError::Io` (from `std::io::Error`) - file system and permission errors
//!
//! **Pipeline errors are fatal for the current document and carry context:**
//! - `ImageDecode` - a page image or cached line image could not be decoded
//! - `ImageProcessing` - resampling or encoding a pixel grid failed
//! - `Segmentation` - a page produced no text lines
//! - `Cache` - a line-extraction cache entry is empty, gapped or unreadable
//! - `Emission` - the scoring backend was used outside its lifecycle
//!
//! Missing optional inputs (gold transcriptions) are not errors; they are logged
//! and reported as absent.
use thiserror::Error;

/// Result type alias using `PalimpsestError`.
pub type Result<T> = std::result::Result<T, PalimpsestError>;

/// Main error type for all Palimpsest operations.
///
/// Messages name the offending path and the invariant that was violated so that
/// operators can diagnose corrupted caches without a debugger.
#[derive(Debug, Error)]
pub enum PalimpsestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decode error: {message}")]
    ImageDecode {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Image processing error: {message}")]
    ImageProcessing {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Segmentation error: {message}")]
    Segmentation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Emission backend error: {message}")]
    Emission {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl From<serde_json::Error> for PalimpsestError {
    fn from(err: serde_json::Error) -> Self {
        PalimpsestError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<rmp_serde::encode::Error> for PalimpsestError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        PalimpsestError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<rmp_serde::decode::Error> for PalimpsestError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        PalimpsestError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<image::ImageError> for PalimpsestError {
    fn from(err: image::ImageError) -> Self {
        match err {
            // IO errors keep their own variant
            image::ImageError::IoError(io) => PalimpsestError::Io(io),
            other => PalimpsestError::ImageDecode {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pastey::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl PalimpsestError {
    error_constructor!(image_decode, ImageDecode);
    error_constructor!(image_processing, ImageProcessing);
    error_constructor!(segmentation, Segmentation);
    error_constructor!(cache, Cache);
    error_constructor!(validation, Validation);
    error_constructor!(serialization, Serialization);
    error_constructor!(emission, Emission);
}
