//! Palimpsest - line extraction and emission scoring for historical-document OCR
//!
//! Palimpsest turns scanned page images into per-line observation sequences and
//! scores those sequences against character glyph templates. It is the
//! image-facing half of an unsupervised OCR system: a decoder downstream consumes
//! the emission scores produced here.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use palimpsest::{Document, PipelineConfig, load_documents};
//! use palimpsest::segment::ProjectionLineSegmenter;
//! use std::sync::Arc;
//!
//! # fn main() -> palimpsest::Result<()> {
//! let config = Arc::new(PipelineConfig::discover()?.unwrap_or_default());
//! let segmenter = Arc::new(ProjectionLineSegmenter::from_params(&config.extraction));
//!
//! for document in load_documents("scans/", config, segmenter)? {
//!     let observations = document.load_observations()?;
//!     println!("{}: {} lines", document.base_name().display(), observations.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Image** (`image`): page decoding, straightening, cropping, binarization and resampling
//! - **Segmentation** (`segment`): splitting a binarized page into text lines
//! - **Observations** (`observation`): canonical-height, column-major line features
//! - **Cache** (`cache`): on-disk line-extraction cache keyed by input path and line height
//! - **Documents** (`document`): lazy, memoized access to observations and gold text
//! - **Emission** (`emission`): pluggable backends scoring observations against templates
//! - **Fonts** (`font`): character templates and their persisted form

#![deny(unsafe_code)]

pub mod cache;
pub mod core;
pub mod document;
pub mod emission;
pub mod error;
pub mod font;
pub mod image;
pub mod observation;
pub mod segment;

pub use error::{PalimpsestError, Result};

pub use core::config::{EmissionConfig, EmissionEngine, ExtractionParams, ObservationMode, PipelineConfig};

pub use cache::{CacheKey, CacheValidity, FirstLinePresent, LineExtractionCache, ManifestComplete};
pub use document::{Document, GoldTextKind, ImageDocument, discover_documents, documents_from_paths, load_documents};
pub use emission::{EmissionBackend, EmissionScorer, EmissionScores, TemplateBank, create_emission_backend};
pub use font::{CharacterTemplate, Font};
pub use image::{BinaryPixelGrid, PageImage, PixelType};
pub use observation::Observation;
pub use segment::{LineImage, LineSegmenter};
