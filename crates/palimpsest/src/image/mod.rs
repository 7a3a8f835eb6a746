//! Page and line pixel representations.
//!
//! A decoded page is a grid of grey levels ([`PageImage`]). Normalization turns it
//! into a [`BinaryPixelGrid`], which is what segmentation and the line cache work
//! with. Resampling to the canonical observation height lives in [`resample`].

pub mod normalize;
pub mod resample;

pub use normalize::{binarize, crop, normalize, straighten};
pub use resample::{ResamplePolicy, resample_line};

use crate::{PalimpsestError, Result};
use bitvec::vec::BitVec;
use image::{GrayImage, ImageReader, Luma};
use ndarray::Array2;
use std::path::Path;

/// Grey level written for ink pixels when a binary grid is rendered.
pub const INK_LEVEL: u8 = 0;
/// Grey level written for background pixels when a binary grid is rendered.
pub const BACKGROUND_LEVEL: u8 = 255;
/// Rendered grey levels strictly below this value read back as ink.
pub const INK_CUTOFF: u8 = 128;

/// Classification of a single pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    Ink,
    Background,
}

/// Decoded page as grey levels in `[0, 255]`, indexed `[row, column]`.
///
/// Zero is black. Levels are kept as `f32` so that straightening can
/// interpolate without quantizing twice.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    levels: Array2<f32>,
}

impl PageImage {
    /// Decode a page image from disk, converting to a single grey channel.
    ///
    /// # Errors
    ///
    /// `PalimpsestError::Io` if the file cannot be opened and
    /// `PalimpsestError::ImageDecode` if its contents cannot be decoded.
    pub fn open(path: &Path) -> Result<Self> {
        let decoded = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| {
                PalimpsestError::image_decode_with_source(format!("Failed to decode page image {}", path.display()), e)
            })?;
        Ok(Self::from_gray(&decoded.to_luma8()))
    }

    pub fn from_gray(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let levels = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            f32::from(gray.get_pixel(x as u32, y as u32)[0])
        });
        Self { levels }
    }

    pub fn from_levels(levels: Array2<f32>) -> Self {
        Self { levels }
    }

    pub fn levels(&self) -> &Array2<f32> {
        &self.levels
    }

    pub fn into_levels(self) -> Array2<f32> {
        self.levels
    }

    pub fn width(&self) -> usize {
        self.levels.ncols()
    }

    pub fn height(&self) -> usize {
        self.levels.nrows()
    }
}

/// Two-valued pixel grid, row-major, one bit per pixel (set = ink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPixelGrid {
    width: usize,
    height: usize,
    ink: BitVec,
}

impl BinaryPixelGrid {
    /// All-background grid.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            ink: BitVec::repeat(false, width * height),
        }
    }

    /// Threshold grey levels: values for which `is_ink` holds become ink.
    pub fn from_levels(levels: &Array2<f32>, is_ink: impl Fn(f32) -> bool) -> Self {
        let (height, width) = levels.dim();
        let mut grid = Self::new(width, height);
        for ((y, x), &value) in levels.indexed_iter() {
            if is_ink(value) {
                grid.ink.set(y * width + x, true);
            }
        }
        grid
    }

    /// Read back a rendered grid; levels below [`INK_CUTOFF`] are ink.
    ///
    /// Tolerates the mild smoothing of lossy formats.
    pub fn from_gray_image(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let mut grid = Self::new(width as usize, height as usize);
        for (x, y, pixel) in gray.enumerate_pixels() {
            if pixel[0] < INK_CUTOFF {
                grid.ink.set(y as usize * width as usize + x as usize, true);
            }
        }
        grid
    }

    /// Render as black ink on a white background.
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            if self.is_ink(x as usize, y as usize) {
                Luma([INK_LEVEL])
            } else {
                Luma([BACKGROUND_LEVEL])
            }
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_ink(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.ink[y * self.width + x]
    }

    pub fn pixel(&self, x: usize, y: usize) -> PixelType {
        if self.is_ink(x, y) {
            PixelType::Ink
        } else {
            PixelType::Background
        }
    }

    /// Mark a pixel. Out-of-range coordinates are ignored.
    pub fn set(&mut self, x: usize, y: usize, pixel: PixelType) {
        if x < self.width && y < self.height {
            self.ink.set(y * self.width + x, pixel == PixelType::Ink);
        }
    }

    pub fn ink_count(&self) -> usize {
        self.ink.count_ones()
    }

    /// Number of ink pixels in each row, top to bottom.
    pub fn row_ink_counts(&self) -> Vec<usize> {
        if self.width == 0 {
            return vec![0; self.height];
        }
        self.ink.chunks(self.width).map(|row| row.count_ones()).collect()
    }

    /// Copy of rows `top..bottom`, clamped to the grid.
    pub fn rows(&self, top: usize, bottom: usize) -> Self {
        let bottom = bottom.min(self.height);
        let top = top.min(bottom);
        let ink = self.ink[top * self.width..bottom * self.width].to_bitvec();
        Self {
            width: self.width,
            height: bottom - top,
            ink,
        }
    }
}
