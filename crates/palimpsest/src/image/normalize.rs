//! Page normalization: straighten, crop, binarize.
//!
//! Each step is deterministic. The output of [`normalize`] is the only input
//! segmentation ever sees.

use super::{BinaryPixelGrid, PageImage};
use crate::{PalimpsestError, Result};
use ndarray::{Array2, s};
use rayon::prelude::*;

/// Largest skew, in degrees, that straightening will correct.
const MAX_SKEW_DEGREES: f32 = 5.0;
/// Angular resolution of the skew search, in degrees.
const SKEW_STEP_DEGREES: f32 = 0.25;
/// Border rows or columns with more ink than this fraction are scanner margin.
const DARK_MARGIN_FRACTION: f64 = 0.5;
const WHITE: f32 = 255.0;

/// Straighten, optionally crop, then binarize a decoded page.
///
/// # Errors
///
/// Returns `PalimpsestError::Validation` if `threshold` is outside `(0, 1)` or
/// the page has no pixels.
pub fn normalize(page: &PageImage, threshold: f64, crop_margins: bool) -> Result<BinaryPixelGrid> {
    validate_threshold(threshold)?;
    if page.width() == 0 || page.height() == 0 {
        return Err(PalimpsestError::validation("page image has no pixels"));
    }

    let mut levels = straighten(page.levels());
    if crop_margins {
        levels = crop(&levels, threshold);
    }

    let grid = binarize(&levels, threshold);
    tracing::debug!(
        width = grid.width(),
        height = grid.height(),
        ink = grid.ink_count(),
        "normalized page"
    );
    Ok(grid)
}

fn validate_threshold(threshold: f64) -> Result<()> {
    if threshold > 0.0 && threshold < 1.0 {
        Ok(())
    } else {
        Err(PalimpsestError::validation(format!(
            "binarize threshold must be in (0, 1), got {}",
            threshold
        )))
    }
}

/// Estimate the page skew and rotate it away.
///
/// Candidate angles are scored by how sharply the vertical intensity gradient
/// concentrates into rows once the page is sheared by that angle; text lines
/// give the sharpest profile when level. Ties go to the smaller correction, and
/// a page that is already level is returned unchanged.
pub fn straighten(levels: &Array2<f32>) -> Array2<f32> {
    let (height, width) = levels.dim();
    if height < 2 || width < 2 {
        return levels.clone();
    }

    let gradient = vertical_gradient(levels);
    let steps = (MAX_SKEW_DEGREES / SKEW_STEP_DEGREES).round() as i32;
    let candidates: Vec<f32> = (-steps..=steps).map(|k| k as f32 * SKEW_STEP_DEGREES).collect();

    let scores: Vec<f64> = candidates
        .par_iter()
        .map(|&degrees| shear_profile_score(&gradient, degrees.to_radians()))
        .collect();

    let mut best = 0usize;
    for (i, &score) in scores.iter().enumerate() {
        let better = score > scores[best]
            || (score == scores[best] && candidates[i].abs() < candidates[best].abs());
        if better {
            best = i;
        }
    }

    let angle = candidates[best];
    if angle == 0.0 {
        return levels.clone();
    }

    tracing::debug!(degrees = angle, "straightening page");
    rotate(levels, angle.to_radians())
}

fn vertical_gradient(levels: &Array2<f32>) -> Array2<f32> {
    let (height, width) = levels.dim();
    Array2::from_shape_fn((height - 1, width), |(y, x)| (levels[[y + 1, x]] - levels[[y, x]]).abs())
}

fn shear_profile_score(gradient: &Array2<f32>, radians: f32) -> f64 {
    let (height, width) = gradient.dim();
    let slope = radians.tan();
    let margin = (width as f32 * slope.abs()).ceil() as usize + 1;
    let mut profile = vec![0f64; height + 2 * margin];

    for ((y, x), &g) in gradient.indexed_iter() {
        if g == 0.0 {
            continue;
        }
        let row = (y as f32 - x as f32 * slope).round() as isize + margin as isize;
        if let Some(bin) = usize::try_from(row).ok().and_then(|r| profile.get_mut(r)) {
            *bin += f64::from(g);
        }
    }

    profile.iter().map(|v| v * v).sum()
}

/// Rotate about the page centre with bilinear sampling; uncovered pixels are white.
fn rotate(levels: &Array2<f32>, radians: f32) -> Array2<f32> {
    let (height, width) = levels.dim();
    let (sin, cos) = radians.sin_cos();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;

    Array2::from_shape_fn((height, width), |(y, x)| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = cx + dx * cos - dy * sin;
        let sy = cy + dx * sin + dy * cos;
        sample_bilinear(levels, sx, sy)
    })
}

fn sample_bilinear(levels: &Array2<f32>, x: f32, y: f32) -> f32 {
    let (height, width) = levels.dim();
    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return WHITE;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = levels[[y0, x0]] * (1.0 - fx) + levels[[y0, x1]] * fx;
    let bottom = levels[[y1, x0]] * (1.0 - fx) + levels[[y1, x1]] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Trim dark scanner margins from the page border.
///
/// Rows and columns are peeled from each edge while more than half of their
/// pixels fall at or below the binarization cutoff. A page that would be
/// cropped away entirely is returned as is.
pub fn crop(levels: &Array2<f32>, threshold: f64) -> Array2<f32> {
    let (height, width) = levels.dim();
    if height == 0 || width == 0 {
        return levels.clone();
    }

    let cutoff = ink_cutoff(levels, threshold);
    let dark_fraction = |line: ndarray::ArrayView1<'_, f32>| {
        line.iter().filter(|&&v| cutoff.is_ink(v)).count() as f64 / line.len() as f64
    };

    let mut top = 0;
    while top < height && dark_fraction(levels.row(top)) > DARK_MARGIN_FRACTION {
        top += 1;
    }
    let mut bottom = height;
    while bottom > top && dark_fraction(levels.row(bottom - 1)) > DARK_MARGIN_FRACTION {
        bottom -= 1;
    }
    if top >= bottom {
        return levels.clone();
    }

    let band = levels.slice(s![top..bottom, ..]);
    let mut left = 0;
    while left < width && dark_fraction(band.column(left)) > DARK_MARGIN_FRACTION {
        left += 1;
    }
    let mut right = width;
    while right > left && dark_fraction(band.column(right - 1)) > DARK_MARGIN_FRACTION {
        right -= 1;
    }
    if left >= right {
        return levels.clone();
    }

    if (top, bottom, left, right) != (0, height, 0, width) {
        tracing::debug!(top, bottom, left, right, "cropped page margins");
    }
    levels.slice(s![top..bottom, left..right]).to_owned()
}

/// Global quantile thresholding.
///
/// The cutoff is the grey level at quantile `threshold` of all pixel values;
/// pixels at or below it are ink, so a larger threshold yields more ink.
pub fn binarize(levels: &Array2<f32>, threshold: f64) -> BinaryPixelGrid {
    let cutoff = ink_cutoff(levels, threshold);
    BinaryPixelGrid::from_levels(levels, |v| cutoff.is_ink(v))
}

fn ink_cutoff(levels: &Array2<f32>, threshold: f64) -> InkCutoff {
    let mut values: Vec<f32> = levels.iter().copied().collect();
    if values.is_empty() {
        return InkCutoff {
            cutoff: 0.0,
            inclusive: false,
        };
    }
    values.sort_unstable_by(f32::total_cmp);

    let index = ((values.len() as f64 * threshold) as usize).min(values.len() - 1);
    let cutoff = values[index];
    let max = values[values.len() - 1];

    // A quantile on the brightest level means a mostly blank page: only
    // strictly darker pixels count as ink.
    InkCutoff {
        cutoff,
        inclusive: cutoff < max,
    }
}

#[derive(Debug, Clone, Copy)]
struct InkCutoff {
    cutoff: f32,
    inclusive: bool,
}

impl InkCutoff {
    fn is_ink(&self, value: f32) -> bool {
        if self.inclusive {
            value <= self.cutoff
        } else {
            value < self.cutoff
        }
    }
}
