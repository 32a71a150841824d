//! End-to-end flow between the colony and the digest engine: harvesting
//! eaten cells, assembling a mosaic, retiring used keys, and discarding
//! results that a session reset has made stale.

use image::{Rgba, RgbaImage};
use pixivore_core::{Colony, ColonyConfig, SampleKey};
use pixivore_mosaic::{
    DigestCoordinator, MosaicError, MosaicOptions, StrategyKind, StrategyPick, TargetFrame,
};
use std::collections::HashSet;

fn checker_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let v = (((x * 53 + y * 97) % 200) + 30) as u8;
        let b = ((x * 31) % 256) as u8;
        Rgba([v, 255 - v, b, 255])
    })
}

fn grazed_colony(seed: u64) -> (Colony, RgbaImage) {
    let config = ColonyConfig {
        grid_width: 8,
        grid_height: 8,
        dish_radius: 3.5,
        spawn_spread: 2.0,
        summary_interval: 0,
        rng_seed: Some(seed),
        ..ColonyConfig::default()
    };
    let image = checker_image(32, 32);
    let mut colony = Colony::new(config).expect("colony");
    colony.load_resource_image(&image).expect("load image");
    colony.reset(10, colony.dish_center());
    (colony, image)
}

/// Marks the first `count` cells of the field as eaten, bypassing the
/// slow grazing loop.
fn graze_cells(colony: &mut Colony, count: usize) {
    for cell in colony.resource_mut().cells_mut().iter_mut().take(count) {
        cell.remaining = 0.01;
    }
}

#[test]
fn fresh_session_has_nothing_to_digest() {
    let (mut colony, image) = grazed_colony(1);
    let samples = colony.harvested_pixels(true, &HashSet::new());
    assert!(samples.is_empty(), "full-alpha image starts uneaten");

    let target = TargetFrame::from_rgba(&image).expect("target");
    let coordinator = DigestCoordinator::new(
        target,
        MosaicOptions::default(),
        colony.generation_counter(),
    );
    assert!(matches!(
        coordinator.create_reconstruction(samples),
        Err(MosaicError::NoSamples)
    ));
}

#[test]
fn harvest_flows_into_an_accepted_digest() {
    let (mut colony, image) = grazed_colony(2);
    graze_cells(&mut colony, 20);
    let samples = colony.harvested_pixels(true, &HashSet::new());
    assert_eq!(samples.len(), 20);

    let target = TargetFrame::from_rgba(&image).expect("target");
    let mut coordinator = DigestCoordinator::new(
        target,
        MosaicOptions::default(),
        colony.generation_counter(),
    );
    let ticket = coordinator
        .create_reconstruction(samples.clone())
        .expect("ticket");
    let result = coordinator.resolve(ticket).expect("accepted digest");

    // 20 samples at square aspect floor to a 4x4 output.
    assert_eq!((result.width, result.height), (4, 4));
    assert_eq!(result.used_keys.len(), 16);
    assert_eq!(result.generation, colony.generation());

    let mut unique: Vec<SampleKey> = result.used_keys.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 16, "every output pixel uses its own sample");

    // Every pixel is traceable to the sample that fed it.
    let by_key: std::collections::HashMap<SampleKey, [f32; 3]> =
        samples.iter().map(|s| (s.key, s.rgb)).collect();
    for (pixel, key) in result.pixels.iter().zip(&result.used_keys) {
        let rgb = by_key.get(key).expect("used key came from the harvest");
        for channel in 0..3 {
            let expected = (rgb[channel] * 255.0).round() as u8;
            assert_eq!(pixel[channel], expected);
        }
        assert_eq!(pixel[3], 255);
    }

    // Retiring the used keys shrinks the next harvest accordingly.
    colony.mark_digested(result.used_keys.iter().copied());
    let leftover = colony.harvested_pixels(true, &HashSet::new());
    assert_eq!(leftover.len(), 4);
    for sample in &leftover {
        assert!(
            !result.used_keys.contains(&sample.key),
            "retired key resurfaced"
        );
    }
}

#[test]
fn caller_exclusions_hide_inflight_keys() {
    let (mut colony, _image) = grazed_colony(3);
    graze_cells(&mut colony, 6);
    let all = colony.harvested_pixels(true, &HashSet::new());
    assert_eq!(all.len(), 6);

    let mut excluded = HashSet::new();
    excluded.insert(all[0].key);
    excluded.insert(all[1].key);
    let filtered = colony.harvested_pixels(true, &excluded);
    assert_eq!(filtered.len(), 4);
    assert!(filtered.iter().all(|s| !excluded.contains(&s.key)));
}

#[test]
fn reset_supersedes_inflight_digests() {
    let (mut colony, image) = grazed_colony(4);
    graze_cells(&mut colony, 20);
    let samples = colony.harvested_pixels(true, &HashSet::new());

    let target = TargetFrame::from_rgba(&image).expect("target");
    let mut coordinator = DigestCoordinator::new(
        target,
        MosaicOptions::default(),
        colony.generation_counter(),
    );
    let ticket = coordinator.create_reconstruction(samples).expect("ticket");

    // A reset lands while the digest is in flight.
    colony.reset(10, colony.dish_center());

    assert!(coordinator.resolve(ticket).is_none(), "stale digest kept");
    assert!(coordinator.last_result().is_none());
    assert!(coordinator.last_used_keys().is_empty());
}

#[test]
fn every_strategy_consumes_each_sample_at_most_once() {
    let (mut colony, image) = grazed_colony(5);
    graze_cells(&mut colony, 30);
    let samples = colony.harvested_pixels(true, &HashSet::new());
    assert_eq!(samples.len(), 30);

    for strategy in StrategyKind::ALL {
        let target = TargetFrame::from_rgba(&image).expect("target");
        let options = MosaicOptions {
            strategy: StrategyPick::Fixed(strategy),
            ..MosaicOptions::default()
        };
        let mut coordinator =
            DigestCoordinator::new(target, options, colony.generation_counter());
        let ticket = coordinator
            .create_reconstruction(samples.clone())
            .expect("ticket");
        let result = coordinator.resolve(ticket).expect("accepted digest");

        assert_eq!(result.strategy, strategy);
        // 30 samples floor to a 5x5 output; with samples to spare every
        // pixel must be filled, each by a distinct sample.
        assert_eq!(result.used_keys.len(), 25, "{strategy:?} left holes");
        let mut unique = result.used_keys.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 25, "{strategy:?} reused a sample");
        assert!(result.pixels.iter().all(|px| px[3] == 255));
    }
}
