//! Demo host: runs a colony over a source image and periodically digests
//! the harvest into mosaic reconstructions.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use image::RgbaImage;
use pixivore_core::{Colony, ColonyConfig, TasteModel};
use pixivore_mosaic::{
    DigestCoordinator, MosaicError, MosaicOptions, Reconstruction, StrategyKind, StrategyPick,
    TargetFrame,
};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "pixivore",
    version,
    about = "Particle colony that grazes an image and digests it back into a mosaic"
)]
struct Cli {
    /// Source image the colony grazes on.
    image: PathBuf,

    /// Simulation ticks to run.
    #[arg(long, default_value_t = 2_000)]
    ticks: u64,

    /// Particles seeded at reset.
    #[arg(long, default_value_t = 96)]
    population: usize,

    /// Resource grid side length in cells.
    #[arg(long, default_value_t = 24)]
    grid: u32,

    /// RNG seed; omit for an entropy seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Clock rate multiplier applied to every tick.
    #[arg(long, default_value_t = 1.0)]
    clock_rate: f32,

    /// Ticks between reproduction passes.
    #[arg(long, default_value_t = 40)]
    repro_interval: u64,

    /// Children allowed per parent per reproduction pass.
    #[arg(long, default_value_t = 2)]
    max_children: u32,

    /// Ticks between digest attempts.
    #[arg(long, default_value_t = 120)]
    digest_interval: u64,

    /// Force a fixed matching strategy instead of the workload-based pick.
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Digest wait budget in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    timeout_ms: u64,

    /// Taste model weighting resource cells against particle preferences.
    #[arg(long, value_enum, default_value_t = TasteArg::Dot)]
    taste: TasteArg,

    /// Append one JSON line per accepted digest to this file.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Save the final accepted mosaic as a PNG.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum StrategyArg {
    Greedy,
    Nearest,
    Bucket,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Greedy => Self::GreedyLuminance,
            StrategyArg::Nearest => Self::NearestColor,
            StrategyArg::Bucket => Self::BucketMatch,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
enum TasteArg {
    Dot,
    HueGated,
}

#[derive(Serialize)]
struct DigestReportLine {
    tick: u64,
    generation: u64,
    width: u32,
    height: u32,
    samples_used: usize,
    ssim: f64,
    rgb_distance: f64,
    score: f32,
    strategy: StrategyKind,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let source = image::open(&cli.image)
        .with_context(|| format!("failed to load image {}", cli.image.display()))?
        .to_rgba8();
    info!(
        width = source.width(),
        height = source.height(),
        "loaded source image"
    );

    let config = ColonyConfig {
        grid_width: cli.grid,
        grid_height: cli.grid,
        dish_radius: cli.grid as f32 * 0.48,
        taste_model: match cli.taste {
            TasteArg::Dot => TasteModel::Dot,
            TasteArg::HueGated => TasteModel::HueGated,
        },
        rng_seed: cli.seed,
        ..ColonyConfig::default()
    };
    let mut colony = Colony::new(config)?;
    colony.load_resource_image(&source)?;
    colony.reset(cli.population, colony.dish_center());
    info!(
        population = colony.alive_count(),
        grid = cli.grid,
        "colony seeded"
    );

    let options = MosaicOptions {
        strategy: cli
            .strategy
            .map_or(StrategyPick::Auto, |arg| StrategyPick::Fixed(arg.into())),
        timeout: Duration::from_millis(cli.timeout_ms),
        ..MosaicOptions::default()
    };
    let target = TargetFrame::from_rgba(&source)?;
    let mut coordinator = DigestCoordinator::new(target, options, colony.generation_counter());

    let mut report = cli
        .report
        .as_ref()
        .map(|path| File::create(path).map(BufWriter::new))
        .transpose()
        .context("failed to create report file")?;

    let mut accepted = 0u32;
    for tick in 1..=cli.ticks {
        colony.step(cli.clock_rate, false, None);
        colony.consume_resources();
        colony.process_deaths();
        if cli.repro_interval > 0 && tick.is_multiple_of(cli.repro_interval) {
            colony.process_reproduction(cli.max_children);
        }
        if cli.digest_interval > 0 && tick.is_multiple_of(cli.digest_interval) {
            match attempt_digest(&mut colony, &mut coordinator) {
                Ok(Some(result)) => {
                    accepted += 1;
                    info!(
                        tick,
                        width = result.width,
                        height = result.height,
                        ssim = result.ssim,
                        score = result.score,
                        strategy = ?result.strategy,
                        "digest accepted"
                    );
                    if let Some(writer) = report.as_mut() {
                        let line = DigestReportLine {
                            tick,
                            generation: result.generation,
                            width: result.width,
                            height: result.height,
                            samples_used: result.used_keys.len(),
                            ssim: result.ssim,
                            rgb_distance: result.rgb_distance,
                            score: result.score,
                            strategy: result.strategy,
                        };
                        serde_json::to_writer(&mut *writer, &line)?;
                        writer.write_all(b"\n")?;
                    }
                }
                Ok(None) => debug!(tick, "digest resolved without a fresh result"),
                Err(MosaicError::NoSamples) => debug!(tick, "nothing harvested yet"),
                Err(err) => warn!(tick, %err, "digest request rejected"),
            }
        }
        if colony.alive_count() == 0 {
            warn!(tick, "colony died out");
            break;
        }
    }

    if let Some(writer) = report.as_mut() {
        writer.flush()?;
    }

    match coordinator.last_result() {
        Some(last) => {
            info!(
                digests = accepted,
                ssim = last.ssim,
                score = last.score,
                width = last.width,
                height = last.height,
                "final mosaic"
            );
            if let Some(path) = &cli.output {
                save_mosaic(&last, path)?;
                info!(path = %path.display(), "wrote mosaic");
            }
        }
        None => warn!("no digest was accepted during the run"),
    }
    info!(
        ticks = colony.tick(),
        alive = colony.alive_count(),
        "run complete"
    );
    Ok(())
}

/// Harvests everything currently eaten, digests it, and on acceptance
/// retires the consumed keys.
fn attempt_digest(
    colony: &mut Colony,
    coordinator: &mut DigestCoordinator,
) -> Result<Option<Arc<Reconstruction>>, MosaicError> {
    let samples = colony.harvested_pixels(true, &HashSet::new());
    let ticket = coordinator.create_reconstruction(samples)?;
    let resolved = coordinator.resolve(ticket);
    if let Some(result) = &resolved {
        colony.mark_digested(result.used_keys.iter().copied());
    }
    Ok(resolved)
}

fn save_mosaic(result: &Reconstruction, path: &Path) -> Result<()> {
    let flat: Vec<u8> = result.pixels.iter().flat_map(|px| *px).collect();
    let img = RgbaImage::from_raw(result.width, result.height, flat)
        .context("mosaic buffer size mismatch")?;
    img.save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
