//! Finding page images and loading them as documents.

use super::{Document, ImageDocument};
use crate::core::config::PipelineConfig;
use crate::core::io::{file_extension, lowest_common_path, traverse_directory};
use crate::segment::LineSegmenter;
use crate::{PalimpsestError, Result};
use image::ImageFormat;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Page images under `input_path`, in sorted order, after applying the
/// configured skip and limit.
///
/// `input_path` may be a single file or a directory searched recursively.
/// Dotfiles, transcriptions (`.txt`) and files whose extension is not a raster
/// format with an enabled decoder are ignored.
///
/// # Errors
///
/// `PalimpsestError::Validation` if `input_path` does not exist or no documents
/// remain after filtering.
pub fn discover_documents(input_path: &Path, config: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let found = if input_path.is_file() {
        vec![input_path.to_path_buf()]
    } else if input_path.is_dir() {
        traverse_directory(input_path, true, is_page_image)?
    } else {
        return Err(PalimpsestError::validation(format!(
            "Input path does not exist: {}",
            input_path.display()
        )));
    };

    let total = found.len();
    let selected: Vec<PathBuf> = found
        .into_iter()
        .skip(config.num_docs_to_skip)
        .take(config.num_docs.unwrap_or(usize::MAX))
        .collect();

    if selected.is_empty() {
        return Err(PalimpsestError::validation(format!(
            "No documents selected under {} (found {}, skipping {}, limit {:?})",
            input_path.display(),
            total,
            config.num_docs_to_skip,
            config.num_docs
        )));
    }

    tracing::info!(
        input = %input_path.display(),
        found = total,
        selected = selected.len(),
        "discovered documents"
    );
    Ok(selected)
}

fn is_page_image(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    let extension = file_extension(path);
    !hidden
        && !extension.eq_ignore_ascii_case("txt")
        && ImageFormat::from_extension(&extension).is_some_and(|format| format.reading_enabled())
}

/// Discover documents under `input_path` and wrap each as an [`ImageDocument`].
///
/// Nothing is decoded yet; each document loads lazily on first use.
pub fn load_documents(
    input_path: impl AsRef<Path>,
    config: Arc<PipelineConfig>,
    segmenter: Arc<dyn LineSegmenter>,
) -> Result<Vec<ImageDocument>> {
    let input_path = input_path.as_ref();
    config.validate()?;

    let documents = discover_documents(input_path, &config)?
        .into_iter()
        .map(|path| ImageDocument::new(path, input_path, Arc::clone(&config), Arc::clone(&segmenter)))
        .collect();
    Ok(documents)
}

/// Wrap an explicit list of page images as documents.
///
/// The lowest common path of the list stands in for the input root, so cache
/// entries keep the same layout as for a discovered directory.
pub fn documents_from_paths(
    paths: &[PathBuf],
    config: Arc<PipelineConfig>,
    segmenter: Arc<dyn LineSegmenter>,
) -> Result<Vec<ImageDocument>> {
    config.validate()?;
    if paths.is_empty() {
        return Err(PalimpsestError::validation("No document paths given"));
    }

    let input_root = lowest_common_path(paths);
    Ok(paths
        .iter()
        .map(|path| ImageDocument::new(path, &input_root, Arc::clone(&config), Arc::clone(&segmenter)))
        .collect())
}

/// Outcome of loading one document in a batch.
#[derive(Debug, Clone)]
pub struct DocumentBatchResult {
    pub path: PathBuf,
    pub success: bool,
    pub line_count: usize,
    pub error: Option<String>,
}

/// Load observations for every document in parallel, one document per task.
///
/// A failing document does not stop the batch. Results follow input order.
pub fn load_all_observations<D: Document>(documents: &[D]) -> Vec<DocumentBatchResult> {
    documents
        .par_iter()
        .map(|document| match document.load_observations() {
            Ok(observations) => DocumentBatchResult {
                path: document.base_name().to_path_buf(),
                success: true,
                line_count: observations.len(),
                error: None,
            },
            Err(e) => {
                tracing::warn!(path = %document.base_name().display(), error = %e, "failed to load document");
                DocumentBatchResult {
                    path: document.base_name().to_path_buf(),
                    success: false,
                    line_count: 0,
                    error: Some(e.to_string()),
                }
            }
        })
        .collect()
}
