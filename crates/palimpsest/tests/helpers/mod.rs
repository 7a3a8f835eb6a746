//! Shared fixtures for integration tests.

#![allow(dead_code)]

use image::{GrayImage, Luma};
use palimpsest::segment::{LineImage, LineSegmenter, ProjectionLineSegmenter};
use palimpsest::{BinaryPixelGrid, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Row ranges of the text bands on [`write_three_line_page`].
pub const THREE_LINE_BANDS: [(u32, u32); 3] = [(8, 21), (38, 51), (68, 81)];

/// White 120x90 page with three bands of vertical ink strokes.
pub fn three_line_page() -> GrayImage {
    GrayImage::from_fn(120, 90, |x, y| {
        let in_band = THREE_LINE_BANDS.iter().any(|&(top, bottom)| y >= top && y < bottom);
        if in_band && (4..116).contains(&x) && x % 5 < 2 {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

pub fn write_three_line_page(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create page directory");
    }
    three_line_page().save(&path).expect("write page image");
    path
}

/// All regular files below `dir`, recursively.
pub fn count_files(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    std::fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("dir entry").path())
        .map(|path| if path.is_dir() { count_files(&path) } else { 1 })
        .sum()
}

/// Projection segmenter that counts how often it runs.
pub struct CountingSegmenter {
    inner: ProjectionLineSegmenter,
    calls: AtomicUsize,
}

impl CountingSegmenter {
    pub fn new() -> Self {
        Self {
            inner: ProjectionLineSegmenter::new(5, 100, 30, 0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LineSegmenter for CountingSegmenter {
    fn name(&self) -> &str {
        "counting"
    }

    fn segment(&self, page: &BinaryPixelGrid) -> Result<Vec<LineImage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.segment(page)
    }
}
