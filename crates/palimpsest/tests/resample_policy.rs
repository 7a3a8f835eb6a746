//! Interpolation choice and output geometry when lines are brought to the
//! observation height.

use image::{GrayImage, Luma};
use palimpsest::image::{ResamplePolicy, resample_line};

fn striped_line(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, _| if x % 3 == 0 { Luma([0]) } else { Luma([255]) })
}

#[test]
fn test_strong_downscale_averages_area() {
    let (resized, policy) = resample_line(&striped_line(251, 100), 40).unwrap();
    assert_eq!(policy, ResamplePolicy::AreaAverage);
    assert_eq!(resized.dimensions(), (100, 40));
}

#[test]
fn test_moderate_downscale_is_bilinear() {
    let (resized, policy) = resample_line(&striped_line(251, 100), 80).unwrap();
    assert_eq!(policy, ResamplePolicy::Bilinear);
    assert_eq!(resized.dimensions(), (200, 80));
}

#[test]
fn test_upscale_is_bicubic() {
    let (resized, policy) = resample_line(&striped_line(15, 10), 25).unwrap();
    assert_eq!(policy, ResamplePolicy::Bicubic);
    assert_eq!(resized.dimensions(), (37, 25));
}

#[test]
fn test_thin_line_keeps_one_column() {
    let (resized, _) = resample_line(&striped_line(1, 90), 20).unwrap();
    assert_eq!(resized.dimensions(), (1, 20));
}

