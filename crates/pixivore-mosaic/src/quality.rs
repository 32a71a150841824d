//! Quality metrics comparing a reconstruction against its target.
//!
//! Candidates are compared at the reference resolution; [`nearest_upscale`]
//! lifts a small mosaic buffer up to it first, rendering holes as black.
//! SSIM here is the single-scale global variant on Rec.601 luminance, not
//! the windowed one: reconstructions are judged as a whole frame.

use image::{Rgb, RgbImage};
use rayon::prelude::*;

/// SSIM stabilizers at the conventional 8-bit scale.
const C1: f64 = 6.5025; // (0.01 * 255)^2
const C2: f64 = 58.5225; // (0.03 * 255)^2

/// Which comparison to run. All variants share one entry point so hosts
/// can treat metric choice as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum QualityMetric {
    /// Sum of squared per-channel differences at 0..255 scale.
    RgbDistance,
    /// Global single-scale SSIM on luminance, clamped to `[0, 1]`.
    Ssim,
    /// Mean redmean color distance; lower is better.
    Perceptual,
    /// Display score in `[0, 100]` derived from the RGB distance.
    Score,
}

impl QualityMetric {
    /// Evaluates the metric for `candidate` against `reference`.
    ///
    /// Both images must share dimensions; reconstructions are upscaled
    /// before evaluation.
    #[must_use]
    pub fn evaluate(self, reference: &RgbImage, candidate: &RgbImage) -> f64 {
        assert_eq!(
            reference.dimensions(),
            candidate.dimensions(),
            "metric inputs must share dimensions"
        );
        match self {
            Self::RgbDistance => rgb_distance(reference, candidate),
            Self::Ssim => ssim(reference, candidate),
            Self::Perceptual => redmean(reference, candidate),
            Self::Score => score(reference, candidate),
        }
    }
}

fn rgb_distance(reference: &RgbImage, candidate: &RgbImage) -> f64 {
    reference
        .as_raw()
        .par_chunks_exact(3)
        .zip(candidate.as_raw().par_chunks_exact(3))
        .map(|(a, b)| {
            let dr = f64::from(a[0]) - f64::from(b[0]);
            let dg = f64::from(a[1]) - f64::from(b[1]);
            let db = f64::from(a[2]) - f64::from(b[2]);
            dr * dr + dg * dg + db * db
        })
        .sum()
}

fn score(reference: &RgbImage, candidate: &RgbImage) -> f64 {
    let pixel_count = (reference.width() as f64) * (reference.height() as f64);
    if pixel_count == 0.0 {
        return 0.0;
    }
    let worst = pixel_count * 3.0 * 255.0 * 255.0;
    let distance = rgb_distance(reference, candidate);
    (100.0 * (1.0 - distance / worst)).clamp(0.0, 100.0)
}

fn luminance_plane(img: &RgbImage) -> Vec<f64> {
    img.as_raw()
        .chunks_exact(3)
        .map(|p| 0.299 * f64::from(p[0]) + 0.587 * f64::from(p[1]) + 0.114 * f64::from(p[2]))
        .collect()
}

fn ssim(reference: &RgbImage, candidate: &RgbImage) -> f64 {
    let x = luminance_plane(reference);
    let y = luminance_plane(candidate);
    let n = x.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    let mut covariance = 0.0;
    for (xi, yi) in x.iter().zip(&y) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        var_x += dx * dx;
        var_y += dy * dy;
        covariance += dx * dy;
    }
    var_x /= n;
    var_y /= n;
    covariance /= n;

    let numerator = (2.0 * mean_x * mean_y + C1) * (2.0 * covariance + C2);
    let denominator = (mean_x * mean_x + mean_y * mean_y + C1) * (var_x + var_y + C2);
    (numerator / denominator).clamp(0.0, 1.0)
}

fn redmean(reference: &RgbImage, candidate: &RgbImage) -> f64 {
    let pixel_count = (reference.width() as f64) * (reference.height() as f64);
    if pixel_count == 0.0 {
        return 0.0;
    }
    let total: f64 = reference
        .as_raw()
        .par_chunks_exact(3)
        .zip(candidate.as_raw().par_chunks_exact(3))
        .map(|(a, b)| {
            let rbar = (f64::from(a[0]) + f64::from(b[0])) * 0.5;
            let dr = f64::from(a[0]) - f64::from(b[0]);
            let dg = f64::from(a[1]) - f64::from(b[1]);
            let db = f64::from(a[2]) - f64::from(b[2]);
            ((2.0 + rbar / 256.0) * dr * dr
                + 4.0 * dg * dg
                + (2.0 + (255.0 - rbar) / 256.0) * db * db)
                .sqrt()
        })
        .sum();
    total / pixel_count
}

/// Nearest-neighbour upscale of an RGBA mosaic buffer to the reference
/// resolution. Transparent holes render as black.
#[must_use]
pub fn nearest_upscale(
    pixels: &[[u8; 4]],
    width: u32,
    height: u32,
    out_width: u32,
    out_height: u32,
) -> RgbImage {
    assert_eq!(pixels.len(), (width as usize) * (height as usize));
    RgbImage::from_fn(out_width, out_height, |x, y| {
        let sx = ((u64::from(x) * u64::from(width)) / u64::from(out_width)).min(u64::from(width) - 1);
        let sy =
            ((u64::from(y) * u64::from(height)) / u64::from(out_height)).min(u64::from(height) - 1);
        let p = pixels[(sy * u64::from(width) + sx) as usize];
        if p[3] == 0 {
            Rgb([0, 0, 0])
        } else {
            Rgb([p[0], p[1], p[2]])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                ((x + y) % 256) as u8,
            ])
        })
    }

    #[test]
    fn identical_images_are_perfect() {
        let img = gradient_image(16, 12);
        assert_eq!(QualityMetric::RgbDistance.evaluate(&img, &img), 0.0);
        assert!((QualityMetric::Ssim.evaluate(&img, &img) - 1.0).abs() < 1e-12);
        assert_eq!(QualityMetric::Perceptual.evaluate(&img, &img), 0.0);
        assert!((QualityMetric::Score.evaluate(&img, &img) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn ssim_stays_in_unit_range() {
        let a = gradient_image(16, 16);
        let b = RgbImage::from_pixel(16, 16, Rgb([255, 255, 255]));
        let inverted = RgbImage::from_fn(16, 16, |x, y| {
            let p = a.get_pixel(x, y).0;
            Rgb([255 - p[0], 255 - p[1], 255 - p[2]])
        });
        for candidate in [&b, &inverted] {
            let value = QualityMetric::Ssim.evaluate(&a, candidate);
            assert!((0.0..=1.0).contains(&value), "ssim {value} out of range");
            assert!(value < 1.0);
        }
    }

    #[test]
    fn distance_orders_by_similarity() {
        let target = gradient_image(12, 12);
        let close = RgbImage::from_fn(12, 12, |x, y| {
            let p = target.get_pixel(x, y).0;
            Rgb([p[0].saturating_add(4), p[1], p[2]])
        });
        let far = RgbImage::from_pixel(12, 12, Rgb([0, 255, 0]));
        let d_close = QualityMetric::RgbDistance.evaluate(&target, &close);
        let d_far = QualityMetric::RgbDistance.evaluate(&target, &far);
        assert!(d_close < d_far);
        assert!(QualityMetric::Score.evaluate(&target, &close) > QualityMetric::Score.evaluate(&target, &far));
        assert!(QualityMetric::Perceptual.evaluate(&target, &close) < QualityMetric::Perceptual.evaluate(&target, &far));
    }

    #[test]
    fn upscale_replicates_blocks_and_blacks_holes() {
        let pixels = vec![
            [255, 0, 0, 255],
            [0, 255, 0, 255],
            [0, 0, 255, 255],
            [7, 7, 7, 0], // hole
        ];
        let out = nearest_upscale(&pixels, 2, 2, 4, 4);
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(out.get_pixel(1, 1).0, [255, 0, 0]);
        assert_eq!(out.get_pixel(3, 0).0, [0, 255, 0]);
        assert_eq!(out.get_pixel(0, 3).0, [0, 0, 255]);
        assert_eq!(out.get_pixel(3, 3).0, [0, 0, 0], "hole renders black");
    }
}
