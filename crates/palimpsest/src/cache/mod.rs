//! On-disk line-extraction cache.
//!
//! Segmenting a page is the expensive step of the pipeline, so extracted lines
//! are written under a cache root and reused by later runs. Entries are keyed by
//! the document's directory relative to the input root, its base name and the
//! canonical line height:
//!
//! ```text
//! <root>/<relative dir>/<line height>/<stem>-line_extract.<ext>     composite
//! <root>/<relative dir>/<line height>/<stem>-line_extract_<ext>/    line directory
//!     line000.<ext>
//!     line001.<ext>
//! ```
//!
//! Lines are stored in the source image's format as binary black-on-white
//! images and re-thresholded on load, so lossy formats still read back as the
//! same ink pattern.
//!
//! Writes are not atomic. Under the default [`FirstLinePresent`] policy an
//! interrupted store can leave a truncated entry that later loads trust; use
//! [`ManifestComplete`] where that matters.

mod validity;

pub use validity::{CacheValidity, FirstLinePresent, MANIFEST_FILE, ManifestComplete};

use crate::core::io::{file_extension, file_stem, relative_parent_dir};
use crate::image::{BinaryPixelGrid, INK_LEVEL};
use crate::segment::LineImage;
use crate::{PalimpsestError, Result};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Grey level of the separator rows between lines in the composite image.
const SEPARATOR_LEVEL: u8 = 128;
const SEPARATOR_ROWS: u32 = 2;

/// Identity of one document's cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub relative_dir: PathBuf,
    pub stem: String,
    pub extension: String,
    pub line_height: i32,
}

impl CacheKey {
    /// Key for `document`, found under the user-supplied `input_root`.
    pub fn for_document(document: &Path, input_root: &Path, line_height: i32) -> Self {
        Self {
            relative_dir: relative_parent_dir(input_root, document),
            stem: file_stem(document),
            extension: file_extension(document),
            line_height,
        }
    }
}

/// Locations of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryPaths {
    pub composite: PathBuf,
    pub line_dir: PathBuf,
    pub extension: String,
}

impl CacheEntryPaths {
    /// Path of line `index`, zero-padded to three digits.
    pub fn line_path(&self, index: usize) -> PathBuf {
        self.line_dir.join(format!("line{:03}.{}", index, self.extension))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.line_dir.join(MANIFEST_FILE)
    }
}

/// Line-extraction cache rooted at a directory.
pub struct LineExtractionCache {
    root: PathBuf,
    validity: Box<dyn CacheValidity>,
}

impl std::fmt::Debug for LineExtractionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineExtractionCache")
            .field("root", &self.root)
            .field("validity", &self.validity.name())
            .finish()
    }
}

impl LineExtractionCache {
    /// Cache with the [`FirstLinePresent`] completeness policy.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_validity(root, Box::new(FirstLinePresent))
    }

    pub fn with_validity(root: impl Into<PathBuf>, validity: Box<dyn CacheValidity>) -> Self {
        Self {
            root: root.into(),
            validity,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self, key: &CacheKey) -> CacheEntryPaths {
        let base = self
            .root
            .join(&key.relative_dir)
            .join(key.line_height.to_string())
            .join(format!("{}-line_extract", key.stem));
        let base = base.to_string_lossy();

        CacheEntryPaths {
            composite: PathBuf::from(format!("{}.{}", base, key.extension)),
            line_dir: PathBuf::from(format!("{}_{}", base, key.extension)),
            extension: key.extension.clone(),
        }
    }

    /// Whether a usable entry exists, as judged by the validity policy.
    pub fn is_cached(&self, key: &CacheKey) -> bool {
        self.validity.is_complete(&self.paths(key))
    }

    /// Read every line of an entry, in index order.
    ///
    /// # Errors
    ///
    /// `PalimpsestError::Cache` if the line directory holds no line files or the
    /// indices are not exactly `0..n`; `PalimpsestError::ImageDecode` if a line
    /// file is unreadable.
    #[tracing::instrument(skip(self, key), fields(cache.stem = %key.stem, cache.line_height = key.line_height))]
    pub fn load(&self, key: &CacheKey) -> Result<Vec<LineImage>> {
        let paths = self.paths(key);
        let files = list_line_files(&paths)?;

        if files.is_empty() {
            return Err(PalimpsestError::cache(format!(
                "No line images found in {}",
                paths.line_dir.display()
            )));
        }

        let mut lines = Vec::with_capacity(files.len());
        for (position, (index, path)) in files.iter().enumerate() {
            if *index != position {
                return Err(PalimpsestError::cache(format!(
                    "Trying to load lines from {} but the file for line {} is missing (found {} instead)",
                    paths.line_dir.display(),
                    position,
                    path.display()
                )));
            }

            let gray = image::open(path)
                .map_err(|e| {
                    PalimpsestError::image_decode_with_source(format!("Failed to read cached line {}", path.display()), e)
                })?
                .to_luma8();
            lines.push(LineImage::new(position, BinaryPixelGrid::from_gray_image(&gray)));
        }

        tracing::debug!(
            dir = %paths.line_dir.display(),
            lines = lines.len(),
            "loaded lines from extraction cache"
        );
        Ok(lines)
    }

    /// Write the composite image and one file per line, then let the validity
    /// policy mark the entry complete.
    ///
    /// Any previous entry for `key` is replaced. If a write fails, everything
    /// written for the entry is removed again before the error is returned.
    #[tracing::instrument(
        skip(self, key, lines),
        fields(cache.stem = %key.stem, cache.lines = lines.len())
    )]
    pub fn store(&self, key: &CacheKey, lines: &[LineImage]) -> Result<()> {
        let paths = self.paths(key);
        let format = ImageFormat::from_extension(&paths.extension)
            .filter(|format| format.writing_enabled())
            .ok_or_else(|| {
                PalimpsestError::cache(format!(
                    "Cannot cache lines with unsupported image extension '{}'",
                    paths.extension
                ))
            })?;

        self.clear(key)?;
        if let Err(e) = self.write_entry(&paths, lines, format) {
            if let Err(cleanup) = self.clear(key) {
                tracing::warn!(
                    dir = %paths.line_dir.display(),
                    error = %cleanup,
                    "failed to remove partial cache entry"
                );
            }
            return Err(e);
        }

        tracing::info!(
            dir = %paths.line_dir.display(),
            lines = lines.len(),
            "stored lines in extraction cache"
        );
        Ok(())
    }

    fn write_entry(&self, paths: &CacheEntryPaths, lines: &[LineImage], format: ImageFormat) -> Result<()> {
        fs::create_dir_all(&paths.line_dir)?;

        save_gray(&composite(lines), &paths.composite, format)?;
        tracing::debug!(path = %paths.composite.display(), "wrote line extraction composite");

        for (index, line) in lines.iter().enumerate() {
            save_gray(&line.grid.to_gray_image(), &paths.line_path(index), format)?;
        }

        self.validity.mark_complete(paths, lines.len())
    }

    /// Remove an entry's composite and line directory. Missing entries are fine.
    pub fn clear(&self, key: &CacheKey) -> Result<()> {
        let paths = self.paths(key);
        if paths.line_dir.exists() {
            fs::remove_dir_all(&paths.line_dir)?;
        }
        if paths.composite.exists() {
            fs::remove_file(&paths.composite)?;
        }
        Ok(())
    }
}

fn line_file_pattern(extension: &str) -> Result<Regex> {
    Regex::new(&format!(r"^line(\d+)\.{}$", regex::escape(extension)))
        .map_err(|e| PalimpsestError::cache_with_source("Failed to build line file pattern", e))
}

/// Line files in the entry's directory as `(index, path)`, sorted by index.
fn list_line_files(paths: &CacheEntryPaths) -> Result<Vec<(usize, PathBuf)>> {
    if !paths.line_dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = line_file_pattern(&paths.extension)?;
    let mut files = Vec::new();
    for entry in fs::read_dir(&paths.line_dir)? {
        let path = entry?.path();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let index = pattern
            .captures(&name)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok());
        if let Some(index) = index {
            files.push((index, path));
        }
    }

    files.sort();
    Ok(files)
}

/// Lines stacked top to bottom with grey separator rows, for human inspection.
fn composite(lines: &[LineImage]) -> GrayImage {
    let width = lines.iter().map(|l| l.width()).max().unwrap_or(0).max(1) as u32;
    let height: u32 = lines.iter().map(|l| l.height() as u32 + SEPARATOR_ROWS).sum::<u32>().max(1);

    let mut image = GrayImage::from_pixel(width, height, Luma([255]));
    let mut top = 0u32;
    for line in lines {
        for y in 0..line.height() {
            for x in 0..line.width() {
                if line.grid.is_ink(x, y) {
                    image.put_pixel(x as u32, top + y as u32, Luma([INK_LEVEL]));
                }
            }
        }
        top += line.height() as u32;
        for y in top..top + SEPARATOR_ROWS {
            for x in 0..width {
                image.put_pixel(x, y, Luma([SEPARATOR_LEVEL]));
            }
        }
        top += SEPARATOR_ROWS;
    }
    image
}

fn save_gray(image: &GrayImage, path: &Path, format: ImageFormat) -> Result<()> {
    let written = match format {
        // The GIF encoder only takes RGB(A) frames.
        ImageFormat::Gif => DynamicImage::ImageLuma8(image.clone()).to_rgb8().save_with_format(path, format),
        _ => image.save_with_format(path, format),
    };
    written.map_err(|e| PalimpsestError::cache_with_source(format!("Failed to write cache image {}", path.display()), e))
}
