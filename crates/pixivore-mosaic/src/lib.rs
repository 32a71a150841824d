//! Mosaic reconstruction for the pixivore workspace.
//!
//! Takes the colony's harvested samples and reassembles the target image
//! at the largest aspect-true resolution the sample budget affords. Every
//! sample feeds at most one output pixel per session; the host retires
//! used keys through the colony's harvest ledger once it accepts a
//! result. Assembly is pure and synchronous here; the async side with
//! staleness handling lives in [`DigestCoordinator`].

mod digest;
mod kdtree;
pub mod quality;

pub use digest::{DigestCoordinator, DigestTicket};
pub use quality::{QualityMetric, nearest_upscale};

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, RgbaImage};
use kdtree::ColorKdTree;
use ordered_float::OrderedFloat;
use pixivore_core::{HarvestedSample, SampleKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced when a reconstruction request cannot be serviced.
#[derive(Debug, Error)]
pub enum MosaicError {
    /// No harvested samples were provided.
    #[error("no harvested samples available")]
    NoSamples,
    /// The target image has no pixels.
    #[error("target image has zero width or height")]
    EmptyTarget,
    /// The sample budget floors to a zero-sized output at this aspect.
    #[error("{samples} sample(s) cannot fill a single row at this aspect ratio")]
    DegenerateDimensions { samples: usize },
}

/// Matching strategy for assigning samples to output pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Rank-pair both sides by luminance. Cheapest; used at large scales.
    GreedyLuminance,
    /// Per-pixel nearest unused sample via a draining k-d tree.
    NearestColor,
    /// Quantized color buckets with nearest-bucket fallback.
    BucketMatch,
}

impl StrategyKind {
    pub const ALL: [Self; 3] = [Self::GreedyLuminance, Self::NearestColor, Self::BucketMatch];
}

/// Strategy selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyPick {
    /// Choose by pair-work budget (`samples × pixels`).
    Auto,
    Fixed(StrategyKind),
}

/// Tuning for assembly and the digest coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MosaicOptions {
    pub strategy: StrategyPick,
    /// How long [`DigestCoordinator::resolve`] waits for a worker.
    pub timeout: Duration,
    /// Largest pair-work handled by the k-d tree under [`StrategyPick::Auto`].
    pub kd_budget: u64,
    /// Largest pair-work handled by bucket matching under [`StrategyPick::Auto`].
    pub bucket_budget: u64,
}

impl Default for MosaicOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyPick::Auto,
            timeout: Duration::from_secs(2),
            kd_budget: 4_000_000,
            bucket_budget: 64_000_000,
        }
    }
}

impl MosaicOptions {
    /// Resolves the strategy for a given workload.
    #[must_use]
    pub fn strategy_for(&self, samples: usize, pixels: usize) -> StrategyKind {
        match self.strategy {
            StrategyPick::Fixed(kind) => kind,
            StrategyPick::Auto => {
                let work = samples as u64 * pixels as u64;
                if work <= self.kd_budget {
                    StrategyKind::NearestColor
                } else if work <= self.bucket_budget {
                    StrategyKind::BucketMatch
                } else {
                    StrategyKind::GreedyLuminance
                }
            }
        }
    }
}

/// Full-resolution reference for one reconstruction session.
///
/// Alpha is composited over black once at construction; per-request
/// working copies are resized from the stored frame.
#[derive(Debug, Clone)]
pub struct TargetFrame {
    full: RgbImage,
    aspect: f32,
}

impl TargetFrame {
    pub fn from_rgba(source: &RgbaImage) -> Result<Self, MosaicError> {
        if source.width() == 0 || source.height() == 0 {
            return Err(MosaicError::EmptyTarget);
        }
        let full = RgbImage::from_fn(source.width(), source.height(), |x, y| {
            let [r, g, b, a] = source.get_pixel(x, y).0;
            let alpha = u16::from(a);
            Rgb([
                ((u16::from(r) * alpha) / 255) as u8,
                ((u16::from(g) * alpha) / 255) as u8,
                ((u16::from(b) * alpha) / 255) as u8,
            ])
        });
        let aspect = source.width() as f32 / source.height() as f32;
        Ok(Self { full, aspect })
    }

    #[must_use]
    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    #[must_use]
    pub fn full(&self) -> &RgbImage {
        &self.full
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.full.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.full.height()
    }

    fn working_copy(&self, width: u32, height: u32) -> RgbImage {
        imageops::resize(&self.full, width, height, FilterType::Triangle)
    }
}

/// Largest `(width, height)` with `width × height ≤ samples` that tracks
/// the aspect ratio. Monotone non-decreasing in the sample budget. `None`
/// when either side floors to zero.
#[must_use]
pub fn optimal_dimensions(aspect: f32, samples: usize) -> Option<(u32, u32)> {
    if samples == 0 || !aspect.is_finite() || aspect <= 0.0 {
        return None;
    }
    let budget = samples as f64;
    let aspect = f64::from(aspect);
    let width = (budget * aspect).sqrt().floor() as u32;
    let height = (budget / aspect).sqrt().floor() as u32;
    (width > 0 && height > 0).then_some((width, height))
}

/// One immutable reconstruction result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconstruction {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA output; unmatched pixels are transparent black.
    pub pixels: Vec<[u8; 4]>,
    pub rgb_distance: f64,
    pub ssim: f64,
    pub score: f32,
    /// Keys of the samples consumed, in raster order of their pixels.
    pub used_keys: Vec<SampleKey>,
    /// Colony generation this result was computed against.
    pub generation: u64,
    pub strategy: StrategyKind,
}

/// Builds a reconstruction from `samples` against `target`.
///
/// Fails fast on an empty sample set or a degenerate output size; once
/// those pass, assembly always succeeds. Each sample index is assigned to
/// at most one pixel.
pub fn assemble(
    samples: &[HarvestedSample],
    target: &TargetFrame,
    options: &MosaicOptions,
    generation: u64,
) -> Result<Reconstruction, MosaicError> {
    if samples.is_empty() {
        return Err(MosaicError::NoSamples);
    }
    let (width, height) = optimal_dimensions(target.aspect(), samples.len()).ok_or(
        MosaicError::DegenerateDimensions {
            samples: samples.len(),
        },
    )?;

    let working = target.working_copy(width, height);
    let target_px: Vec<[f32; 3]> = working
        .pixels()
        .map(|p| [f32::from(p.0[0]), f32::from(p.0[1]), f32::from(p.0[2])])
        .collect();
    let sample_px: Vec<[f32; 3]> = samples
        .iter()
        .map(|s| {
            [
                (s.rgb[0] * 255.0).clamp(0.0, 255.0),
                (s.rgb[1] * 255.0).clamp(0.0, 255.0),
                (s.rgb[2] * 255.0).clamp(0.0, 255.0),
            ]
        })
        .collect();

    let strategy = options.strategy_for(sample_px.len(), target_px.len());
    let assignment = match strategy {
        StrategyKind::GreedyLuminance => greedy_luminance(&sample_px, &target_px),
        StrategyKind::NearestColor => nearest_color(&sample_px, &target_px),
        StrategyKind::BucketMatch => bucket_match(&sample_px, &target_px),
    };

    let mut pixels = vec![[0u8; 4]; target_px.len()];
    let mut used_keys = Vec::with_capacity(target_px.len());
    for (pixel, chosen) in assignment.iter().enumerate() {
        if let Some(sample_idx) = chosen {
            let sample = &samples[*sample_idx];
            pixels[pixel] = [
                channel_to_u8(sample.rgb[0]),
                channel_to_u8(sample.rgb[1]),
                channel_to_u8(sample.rgb[2]),
                255,
            ];
            used_keys.push(sample.key);
        }
    }

    let candidate = nearest_upscale(&pixels, width, height, target.width(), target.height());
    let rgb_distance = QualityMetric::RgbDistance.evaluate(target.full(), &candidate);
    let ssim = QualityMetric::Ssim.evaluate(target.full(), &candidate);
    let score = QualityMetric::Score.evaluate(target.full(), &candidate) as f32;

    Ok(Reconstruction {
        width,
        height,
        pixels,
        rgb_distance,
        ssim,
        score,
        used_keys,
        generation,
        strategy,
    })
}

fn channel_to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

fn luminance(rgb: [f32; 3]) -> f32 {
    0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2]
}

/// Rank-pairing by luminance. With more samples than pixels the pairing
/// strides through the sorted samples (`rank · M / T`) so the output
/// spans the harvest's full brightness range instead of its darkest
/// prefix; with more pixels than samples the pairing is one-to-one by
/// rank and the brightest pixels are left as holes.
fn greedy_luminance(samples: &[[f32; 3]], target: &[[f32; 3]]) -> Vec<Option<usize>> {
    let mut assignment = vec![None; target.len()];
    if samples.is_empty() || target.is_empty() {
        return assignment;
    }
    let mut sample_order: Vec<usize> = (0..samples.len()).collect();
    sample_order.sort_unstable_by_key(|&i| (OrderedFloat(luminance(samples[i])), i));
    let mut pixel_order: Vec<usize> = (0..target.len()).collect();
    pixel_order.sort_unstable_by_key(|&i| (OrderedFloat(luminance(target[i])), i));

    for (rank, &pixel) in pixel_order.iter().enumerate() {
        if rank >= samples.len() {
            break;
        }
        let pick = if samples.len() >= target.len() {
            rank * samples.len() / target.len()
        } else {
            rank
        };
        assignment[pixel] = Some(sample_order[pick]);
    }
    assignment
}

fn nearest_color(samples: &[[f32; 3]], target: &[[f32; 3]]) -> Vec<Option<usize>> {
    let mut tree = ColorKdTree::build(samples);
    target.iter().map(|color| tree.take_nearest(*color)).collect()
}

// 256 levels quantized down to 64 per channel.
const QUANT_SHIFT: u32 = 2;

fn bucket_key(color: [f32; 3]) -> u32 {
    let q = |v: f32| ((v.clamp(0.0, 255.0) as u32) >> QUANT_SHIFT).min(63);
    (q(color[0]) << 12) | (q(color[1]) << 6) | q(color[2])
}

fn bucket_center(key: u32) -> [f32; 3] {
    let level = |k: u32| (((k & 63) << QUANT_SHIFT) as f32) + 2.0;
    [level(key >> 12), level(key >> 6), level(key)]
}

/// Quantized histogram matching: exact bucket first, then the nearest
/// non-exhausted bucket by representative color. Within a bucket, samples
/// drain in reverse insertion order.
fn bucket_match(samples: &[[f32; 3]], target: &[[f32; 3]]) -> Vec<Option<usize>> {
    let mut buckets: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (idx, color) in samples.iter().enumerate() {
        buckets.entry(bucket_key(*color)).or_default().push(idx);
    }

    let mut assignment = vec![None; target.len()];
    for (pixel, color) in target.iter().enumerate() {
        let key = bucket_key(*color);
        let direct = buckets.get_mut(&key).and_then(Vec::pop);
        assignment[pixel] = match direct {
            Some(idx) => Some(idx),
            None => {
                let center = bucket_center(key);
                let fallback = buckets
                    .iter()
                    .filter(|(_, stack)| !stack.is_empty())
                    .min_by(|(ka, _), (kb, _)| {
                        color_dist_sq(bucket_center(**ka), center)
                            .total_cmp(&color_dist_sq(bucket_center(**kb), center))
                    })
                    .map(|(k, _)| *k);
                fallback.and_then(|k| buckets.get_mut(&k).and_then(Vec::pop))
            }
        };
    }
    assignment
}

fn color_dist_sq(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}
