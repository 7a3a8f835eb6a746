//! Documents: one page image and everything derived from it.
//!
//! An [`ImageDocument`] computes its observations at most once. The first call
//! to [`Document::load_observations`] runs the decision procedure:
//!
//! 1. no cache configured: decode, normalize and segment the page image;
//! 2. cache entry present: read the lines from the cache;
//! 3. otherwise: extract from the page image, then write the cache entry.
//!
//! Lines are then resampled to the canonical height and converted to
//! observations. Later calls, from any thread, return the memoized result.

mod gold;
mod loader;

pub use gold::{GoldTextKind, gold_text_path, load_text_file, normalize_text_stream, read_characters};
pub use loader::{DocumentBatchResult, discover_documents, documents_from_paths, load_all_observations, load_documents};

use crate::cache::{CacheKey, CacheValidity, LineExtractionCache};
use crate::core::config::PipelineConfig;
use crate::image::{PageImage, normalize};
use crate::observation::Observation;
use crate::Result;
use crate::segment::{LineImage, LineSegmenter};
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Read access to a document's derived data.
///
/// # Thread Safety
///
/// Documents are shared across worker threads; every loader memoizes its
/// result so concurrent callers see a single computation.
pub trait Document: Send + Sync {
    /// Path of the source page image.
    fn base_name(&self) -> &Path;

    /// Observations for every text line, top to bottom.
    fn load_observations(&self) -> Result<&[Observation]>;

    /// Gold transcription lines of the given kind, or `None` if there is none.
    fn load_gold_text(&self, kind: GoldTextKind) -> Result<Option<&[Vec<String>]>>;

    /// Normalized transcription flattened into one character stream.
    fn load_normalized_text(&self) -> Result<Option<&[String]>>;
}

/// A document backed by a raster page image.
pub struct ImageDocument {
    path: PathBuf,
    input_root: PathBuf,
    config: Arc<PipelineConfig>,
    segmenter: Arc<dyn LineSegmenter>,
    cache: Option<LineExtractionCache>,
    observations: OnceCell<Vec<Observation>>,
    diplomatic: OnceCell<Option<Vec<Vec<String>>>>,
    normalized: OnceCell<Option<Vec<Vec<String>>>>,
    normalized_text: OnceCell<Option<Vec<String>>>,
}

impl std::fmt::Debug for ImageDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageDocument")
            .field("path", &self.path)
            .field("input_root", &self.input_root)
            .field("segmenter", &self.segmenter.name())
            .field("cache", &self.cache)
            .finish()
    }
}

impl ImageDocument {
    /// `input_root` is the path the document was discovered under; it anchors
    /// the document's location inside the line-extraction cache.
    pub fn new(
        path: impl Into<PathBuf>,
        input_root: impl Into<PathBuf>,
        config: Arc<PipelineConfig>,
        segmenter: Arc<dyn LineSegmenter>,
    ) -> Self {
        let cache = config.extracted_lines_path.as_ref().map(LineExtractionCache::new);
        Self {
            path: path.into(),
            input_root: input_root.into(),
            config,
            segmenter,
            cache,
            observations: OnceCell::new(),
            diplomatic: OnceCell::new(),
            normalized: OnceCell::new(),
            normalized_text: OnceCell::new(),
        }
    }

    /// Replace the cache completeness policy. No effect without a cache root.
    pub fn with_cache_validity(mut self, validity: Box<dyn CacheValidity>) -> Self {
        if let Some(cache) = self.cache.take() {
            self.cache = Some(LineExtractionCache::with_validity(cache.root().to_path_buf(), validity));
        }
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_document(&self.path, &self.input_root, self.config.effective_line_height())
    }

    pub fn cache(&self) -> Option<&LineExtractionCache> {
        self.cache.as_ref()
    }

    fn extract_lines(&self) -> Result<Vec<LineImage>> {
        tracing::info!(path = %self.path.display(), "extracting text lines from page image");
        let page = PageImage::open(&self.path)?;
        let grid = normalize(&page, self.config.binarize_threshold, self.config.crop)?;
        self.segmenter.segment(&grid)
    }

    fn load_line_images(&self) -> Result<Vec<LineImage>> {
        let Some(cache) = &self.cache else {
            return self.extract_lines();
        };

        let key = self.cache_key();
        if cache.is_cached(&key) {
            tracing::info!(path = %self.path.display(), "loading text lines from extraction cache");
            return cache.load(&key);
        }

        let lines = self.extract_lines()?;
        cache.store(&key, &lines)?;
        Ok(lines)
    }

    #[tracing::instrument(skip(self), fields(document.path = %self.path.display()))]
    fn compute_observations(&self) -> Result<Vec<Observation>> {
        let lines = self.load_line_images()?;
        let line_height = self.config.effective_line_height();
        let mode = self.config.observation_mode;

        let observations = lines
            .par_iter()
            .map(|line| Observation::from_line(line, line_height, mode))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            path = %self.path.display(),
            lines = observations.len(),
            line_height,
            "built observations"
        );
        Ok(observations)
    }

    fn gold_cell(&self, kind: GoldTextKind) -> &OnceCell<Option<Vec<Vec<String>>>> {
        match kind {
            GoldTextKind::Diplomatic => &self.diplomatic,
            GoldTextKind::Normalized => &self.normalized,
        }
    }
}

impl Document for ImageDocument {
    fn base_name(&self) -> &Path {
        &self.path
    }

    fn load_observations(&self) -> Result<&[Observation]> {
        let observations = self.observations.get_or_try_init(|| self.compute_observations())?;
        Ok(observations.as_slice())
    }

    fn load_gold_text(&self, kind: GoldTextKind) -> Result<Option<&[Vec<String>]>> {
        let lines = self
            .gold_cell(kind)
            .get_or_try_init(|| load_text_file(&gold_text_path(&self.path, kind), kind))?;
        Ok(lines.as_deref())
    }

    fn load_normalized_text(&self) -> Result<Option<&[String]>> {
        let text = self.normalized_text.get_or_try_init(|| {
            Ok::<_, crate::PalimpsestError>(
                self.load_gold_text(GoldTextKind::Normalized)?
                    .map(normalize_text_stream),
            )
        })?;
        Ok(text.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PalimpsestError;
    use crate::image::BinaryPixelGrid;
    use image::{GrayImage, Luma};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct FixedSegmenter {
        calls: AtomicUsize,
    }

    impl LineSegmenter for FixedSegmenter {
        fn name(&self) -> &str {
            "fixed"
        }

        fn segment(&self, page: &BinaryPixelGrid) -> Result<Vec<LineImage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let half = page.height() / 2;
            Ok(vec![
                LineImage::new(0, page.rows(0, half)),
                LineImage::new(1, page.rows(half, page.height())),
            ])
        }
    }

    fn write_page(dir: &Path) -> PathBuf {
        let path = dir.join("page.png");
        GrayImage::from_fn(20, 16, |x, y| if x % 4 == 0 && y % 8 > 2 { Luma([0]) } else { Luma([255]) })
            .save(&path)
            .unwrap();
        path
    }

    fn config(cache_root: Option<&Path>) -> Arc<PipelineConfig> {
        Arc::new(PipelineConfig {
            line_height: 8,
            crop: false,
            extracted_lines_path: cache_root.map(Path::to_path_buf),
            ..PipelineConfig::default()
        })
    }

    #[test]
    fn test_observations_are_memoized() {
        let dir = tempdir().unwrap();
        let page = write_page(dir.path());
        let segmenter = Arc::new(FixedSegmenter { calls: AtomicUsize::new(0) });
        let doc = ImageDocument::new(&page, dir.path(), config(None), segmenter.clone());

        let first = doc.load_observations().unwrap().as_ptr();
        let second = doc.load_observations().unwrap().as_ptr();
        assert_eq!(first, second);
        assert_eq!(segmenter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(doc.load_observations().unwrap().len(), 2);
        assert!(doc.load_observations().unwrap().iter().all(|o| o.height() == 8));
    }

    #[test]
    fn test_concurrent_loads_compute_once() {
        let dir = tempdir().unwrap();
        let page = write_page(dir.path());
        let segmenter = Arc::new(FixedSegmenter { calls: AtomicUsize::new(0) });
        let doc = ImageDocument::new(&page, dir.path(), config(None), segmenter.clone());

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| doc.load_observations().unwrap().len());
            }
        });
        assert_eq!(segmenter.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cache_written_then_reused() {
        let dir = tempdir().unwrap();
        let cache_root = dir.path().join("cache");
        let page = write_page(dir.path());

        let first = Arc::new(FixedSegmenter { calls: AtomicUsize::new(0) });
        let doc = ImageDocument::new(&page, dir.path(), config(Some(&cache_root)), first.clone());
        let expected = doc.load_observations().unwrap().to_vec();
        assert!(doc.cache().unwrap().is_cached(&doc.cache_key()));

        let second = Arc::new(FixedSegmenter { calls: AtomicUsize::new(0) });
        let doc = ImageDocument::new(&page, dir.path(), config(Some(&cache_root)), second.clone());
        assert_eq!(doc.load_observations().unwrap(), expected.as_slice());
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_undecodable_page_is_error() {
        let dir = tempdir().unwrap();
        let page = dir.path().join("page.png");
        std::fs::write(&page, b"not a png").unwrap();
        let doc = ImageDocument::new(
            &page,
            dir.path(),
            config(None),
            Arc::new(FixedSegmenter { calls: AtomicUsize::new(0) }),
        );
        assert!(matches!(doc.load_observations(), Err(PalimpsestError::ImageDecode { .. })));
    }

    #[test]
    fn test_gold_text_loaded_lazily() {
        let dir = tempdir().unwrap();
        let page = write_page(dir.path());
        std::fs::write(dir.path().join("page_normalized.txt"), "the  quick\nfox\n").unwrap();
        let doc = ImageDocument::new(
            &page,
            dir.path(),
            config(None),
            Arc::new(FixedSegmenter { calls: AtomicUsize::new(0) }),
        );

        assert!(doc.load_gold_text(GoldTextKind::Diplomatic).unwrap().is_none());
        assert_eq!(doc.load_gold_text(GoldTextKind::Normalized).unwrap().unwrap().len(), 2);
        assert_eq!(doc.load_normalized_text().unwrap().unwrap().concat(), "the quick fox");
    }
}
