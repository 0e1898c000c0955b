//! Raster sharpness via Laplacian variance.

use image::{DynamicImage, GrayImage};

/// Variance of the 4-neighbour Laplacian response over the grayscale raster.
///
/// Crisp text yields variances in the thousands; blurry scans or re-rendered
/// screenshots fall well below the hundreds.
pub fn laplacian_variance(image: &DynamicImage) -> f64 {
    laplacian_variance_gray(&image.to_luma8())
}

pub fn laplacian_variance_gray(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| -> f64 { gray.get_pixel(x, y).0[0] as f64 };

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut n = 0u64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
            n += 1;
        }
    }

    let n = n as f64;
    let mean = sum / n;
    (sum_sq / n) - mean * mean
}
