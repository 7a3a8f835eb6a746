//! Resampling line images to the canonical observation height.

use crate::{PalimpsestError, Result};
use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::GrayImage;

/// Interpolation chosen from the target/source height ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplePolicy {
    /// Strong downscale (ratio below 0.5): average the covered source area
    AreaAverage,
    /// Moderate downscale or same size
    Bilinear,
    /// Upscale (ratio above 1.0)
    Bicubic,
}

impl ResamplePolicy {
    pub fn for_ratio(ratio: f64) -> Self {
        if ratio < 0.5 {
            Self::AreaAverage
        } else if ratio > 1.0 {
            Self::Bicubic
        } else {
            Self::Bilinear
        }
    }

    fn algorithm(self) -> ResizeAlg {
        match self {
            Self::AreaAverage => ResizeAlg::Convolution(FilterType::Box),
            Self::Bilinear => ResizeAlg::Convolution(FilterType::Bilinear),
            Self::Bicubic => ResizeAlg::Convolution(FilterType::CatmullRom),
        }
    }
}

/// Scale `line` so its height becomes `target_height`, keeping the aspect ratio.
///
/// The new width is `floor(width * target_height / height)`, never less than one
/// column. Returns the resampled image and the policy that produced it; a line
/// already at the target height is copied unchanged.
///
/// # Errors
///
/// `PalimpsestError::Validation` for an empty line or zero target height,
/// `PalimpsestError::ImageProcessing` if the resizer rejects the buffers.
pub fn resample_line(line: &GrayImage, target_height: u32) -> Result<(GrayImage, ResamplePolicy)> {
    let (width, height) = line.dimensions();
    if width == 0 || height == 0 {
        return Err(PalimpsestError::validation("cannot resample an empty line image"));
    }
    if target_height == 0 {
        return Err(PalimpsestError::validation("target line height must be positive"));
    }

    let ratio = f64::from(target_height) / f64::from(height);
    let policy = ResamplePolicy::for_ratio(ratio);
    if target_height == height {
        return Ok((line.clone(), policy));
    }

    let target_width = ((ratio * f64::from(width)).floor() as u32).max(1);

    let src = Image::from_vec_u8(width, height, line.as_raw().clone(), PixelType::U8)
        .map_err(|e| PalimpsestError::image_processing_with_source("Failed to wrap line image for resampling", e))?;
    let mut dst = Image::new(target_width, target_height, PixelType::U8);

    let mut resizer = Resizer::new();
    resizer
        .resize(&src, &mut dst, &ResizeOptions::new().resize_alg(policy.algorithm()))
        .map_err(|e| {
            PalimpsestError::image_processing_with_source(
                format!(
                    "Failed to resample line from {}x{} to {}x{}",
                    width, height, target_width, target_height
                ),
                e,
            )
        })?;

    let resampled = GrayImage::from_raw(target_width, target_height, dst.buffer().to_vec())
        .ok_or_else(|| PalimpsestError::image_processing("resampled buffer has unexpected length"))?;

    Ok((resampled, policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_policy_thresholds() {
        assert_eq!(ResamplePolicy::for_ratio(0.4), ResamplePolicy::AreaAverage);
        assert_eq!(ResamplePolicy::for_ratio(0.5), ResamplePolicy::Bilinear);
        assert_eq!(ResamplePolicy::for_ratio(0.8), ResamplePolicy::Bilinear);
        assert_eq!(ResamplePolicy::for_ratio(1.0), ResamplePolicy::Bilinear);
        assert_eq!(ResamplePolicy::for_ratio(1.5), ResamplePolicy::Bicubic);
    }

    #[test]
    fn test_downscale_width_is_floored() {
        let line = GrayImage::from_pixel(33, 100, Luma([255]));
        let (out, policy) = resample_line(&line, 40).unwrap();
        assert_eq!(policy, ResamplePolicy::AreaAverage);
        assert_eq!(out.dimensions(), (13, 40));
    }

    #[test]
    fn test_upscale_uses_bicubic() {
        let line = GrayImage::from_pixel(10, 20, Luma([0]));
        let (out, policy) = resample_line(&line, 30).unwrap();
        assert_eq!(policy, ResamplePolicy::Bicubic);
        assert_eq!(out.dimensions(), (15, 30));
        assert!(out.pixels().all(|p| p[0] < 128));
    }

    #[test]
    fn test_same_height_is_identity() {
        let line = GrayImage::from_fn(7, 12, |x, y| Luma([((x * 13 + y * 7) % 256) as u8]));
        let (out, _) = resample_line(&line, 12).unwrap();
        assert_eq!(out, line);
    }

    #[test]
    fn test_tiny_line_keeps_one_column() {
        let line = GrayImage::from_pixel(1, 90, Luma([255]));
        let (out, _) = resample_line(&line, 10).unwrap();
        assert_eq!(out.dimensions(), (1, 10));
    }

    #[test]
    fn test_zero_target_rejected() {
        let line = GrayImage::from_pixel(4, 4, Luma([255]));
        assert!(matches!(
            resample_line(&line, 0),
            Err(PalimpsestError::Validation { .. })
        ));
    }
}
