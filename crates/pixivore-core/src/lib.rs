//! Core colony simulation for the pixivore workspace.
//!
//! A fixed-capacity population of particles lives in a circular dish laid
//! over a [`ResourceField`] resampled from a target image. Particles move
//! under Lenia-style pairwise kernel forces plus a taste-weighted resource
//! gradient, feed where they stand, deplete the field in a separate
//! consumption pass, dissolve back into it when they starve, and reproduce
//! into empty slots with mutated preferences. Eaten cells become harvest
//! samples for the reconstruction engine in `pixivore-mosaic`.

pub mod kernel;

mod field;
mod harvest;
mod particles;

pub use field::{ResourceCell, ResourceField, TasteModel};
pub use harvest::{HarvestLedger, HarvestedSample, SampleKey};
pub use particles::{Attractor, ParticleColumns, VOID_POSITION, Vec2};

use image::RgbaImage;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::f32::consts::TAU;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Pair distance below which two particles count as coincident and get a
/// deterministic nudge instead of a divide-by-zero.
const COINCIDENT_EPS: f32 = 1e-4;

/// Golden angle in radians, used to fan out coincident particles by slot.
const GOLDEN_ANGLE: f32 = 2.399_963_2;

/// Preference used when a mutated taste vector collapses to zero.
const EQUAL_PREFERENCE: [f32; 3] = [0.577_350_3, 0.577_350_3, 0.577_350_3];

fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

fn normalize_preference(mut preference: [f32; 3]) -> [f32; 3] {
    let norm = (preference[0] * preference[0]
        + preference[1] * preference[1]
        + preference[2] * preference[2])
        .sqrt();
    if norm > 1e-3 {
        for channel in &mut preference {
            *channel /= norm;
        }
        preference
    } else {
        EQUAL_PREFERENCE
    }
}

/// Errors raised when constructing or reconfiguring a colony.
#[derive(Debug, Error)]
pub enum ColonyError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The provided resource image has no pixels.
    #[error("resource image has zero width or height")]
    EmptyImage,
}

/// Monotonic session marker shared with asynchronous consumers.
///
/// The colony bumps it on every reset and resource reload; workers capture
/// the value at submit time and their results are discarded when it no
/// longer matches at completion time.
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter(Arc<AtomicU64>);

impl GenerationCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Advances the counter, returning the new value.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Static configuration for a colony.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColonyConfig {
    /// Resource grid width in cells; also bounds the particle capacity.
    pub grid_width: u32,
    /// Resource grid height in cells.
    pub grid_height: u32,
    /// Radius of the circular dish particles are clamped into, in cells.
    pub dish_radius: f32,
    /// Base integration step; multiplied by the caller's clock rate.
    pub time_step: f32,
    /// Fraction of the previous displacement carried into the next step.
    pub momentum: f32,
    /// Pair kernel peak distance.
    pub kernel_mu: f32,
    /// Pair kernel width.
    pub kernel_sigma: f32,
    /// Weight applied to each pair kernel contribution.
    pub kernel_weight: f32,
    /// Growth mapping peak: the comfortable neighbourhood field strength.
    pub growth_mu: f32,
    /// Growth mapping width.
    pub growth_sigma: f32,
    /// Short-range repulsion strength.
    pub repulsion_strength: f32,
    /// Gain on the taste-weighted resource gradient force.
    pub resource_pull: f32,
    /// How preferences weight resource cells.
    pub taste_model: TasteModel,
    /// Hue window (degrees) for [`TasteModel::HueGated`].
    pub hue_gate_degrees: f32,
    /// Energy gained per tick per unit of remaining alpha under the particle.
    pub feed_rate: f32,
    /// Energy lost per tick.
    pub energy_decay: f32,
    /// Energy given to particles seeded by [`Colony::reset`].
    pub initial_energy: f32,
    /// Radius of the seeding disc around the reset center.
    pub spawn_spread: f32,
    /// Radius of the consumption scatter around each particle.
    pub consume_radius: f32,
    /// Peak alpha removed per consumption pass at distance zero.
    pub resource_decay: f32,
    /// Remaining alpha below which a cell counts as eaten.
    pub eaten_threshold: f32,
    /// Minimum energy for reproduction eligibility.
    pub repro_threshold: f32,
    /// Minimum age in ticks for reproduction eligibility.
    pub repro_min_age: u64,
    /// Energy a parent pays per reproduction pass it spawns in.
    pub repro_cost: f32,
    /// Minimum child spawn distance from the parent.
    pub child_spawn_min: f32,
    /// Maximum child spawn distance from the parent.
    pub child_spawn_max: f32,
    /// Scale of the per-channel taste mutation applied to children.
    pub preference_mutation: f32,
    /// Dissolution radius for a newborn particle.
    pub dissolve_radius_base: f32,
    /// Extra dissolution radius per tick of age.
    pub dissolve_radius_per_age: f32,
    /// Upper bound on the dissolution radius.
    pub dissolve_radius_max: f32,
    /// Falloff exponent of the dissolution deposit.
    pub dissolve_falloff: f32,
    /// Gain on the color a dying particle returns to the field.
    pub dissolve_color_gain: f32,
    /// Gain on the alpha a dying particle returns to the field.
    pub dissolve_alpha_gain: f32,
    /// Gain on the optional attractor pull.
    pub attract_strength: f32,
    /// Ticks between telemetry summaries; 0 disables them.
    pub summary_interval: u32,
    /// Bound on the telemetry history ring.
    pub history_capacity: usize,
    /// Optional RNG seed for reproducible colonies.
    pub rng_seed: Option<u64>,
}

impl Default for ColonyConfig {
    fn default() -> Self {
        let kernel_mu = 4.0;
        let kernel_sigma = 1.0;
        Self {
            grid_width: 24,
            grid_height: 24,
            dish_radius: 11.5,
            time_step: 0.1,
            momentum: 0.2,
            kernel_mu,
            kernel_sigma,
            // Ring-normalized so a uniformly surrounded particle's summed
            // field sits near one; roughly 0.022 for this ring.
            kernel_weight: kernel::normalized_weight(kernel_mu, kernel_sigma),
            growth_mu: 0.6,
            growth_sigma: 0.15,
            repulsion_strength: 1.0,
            resource_pull: 0.35,
            taste_model: TasteModel::Dot,
            hue_gate_degrees: 60.0,
            feed_rate: 0.045,
            energy_decay: 0.004,
            initial_energy: 0.6,
            spawn_spread: 3.0,
            consume_radius: 2.5,
            resource_decay: 0.02,
            eaten_threshold: 0.1,
            repro_threshold: 0.85,
            repro_min_age: 240,
            repro_cost: 0.5,
            child_spawn_min: 1.0,
            child_spawn_max: 3.0,
            preference_mutation: 0.08,
            dissolve_radius_base: 1.5,
            dissolve_radius_per_age: 0.002,
            dissolve_radius_max: 6.0,
            dissolve_falloff: 2.0,
            dissolve_color_gain: 0.25,
            dissolve_alpha_gain: 0.35,
            attract_strength: 0.6,
            summary_interval: 60,
            history_capacity: 256,
            rng_seed: None,
        }
    }
}

impl ColonyConfig {
    /// Validates the configuration, returning the derived grid dimensions.
    fn grid_dimensions(&self) -> Result<(u32, u32), ColonyError> {
        if self.grid_width < 2 || self.grid_height < 2 {
            return Err(ColonyError::InvalidConfig(
                "grid dimensions must be at least 2x2",
            ));
        }
        if self.dish_radius <= 0.0 {
            return Err(ColonyError::InvalidConfig("dish_radius must be positive"));
        }
        if self.time_step <= 0.0 {
            return Err(ColonyError::InvalidConfig("time_step must be positive"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(ColonyError::InvalidConfig("momentum must be in [0, 1)"));
        }
        if self.kernel_sigma <= 0.0 || self.growth_sigma <= 0.0 {
            return Err(ColonyError::InvalidConfig(
                "kernel widths must be positive",
            ));
        }
        if self.kernel_weight <= 0.0 {
            return Err(ColonyError::InvalidConfig("kernel_weight must be positive"));
        }
        if self.repulsion_strength < 0.0 || self.resource_pull < 0.0 {
            return Err(ColonyError::InvalidConfig(
                "force gains must be non-negative",
            ));
        }
        if !(0.0..=180.0).contains(&self.hue_gate_degrees) || self.hue_gate_degrees == 0.0 {
            return Err(ColonyError::InvalidConfig(
                "hue_gate_degrees must be in (0, 180]",
            ));
        }
        if self.feed_rate < 0.0 || self.energy_decay < 0.0 {
            return Err(ColonyError::InvalidConfig(
                "feed_rate and energy_decay must be non-negative",
            ));
        }
        if !(0.0..=1.0).contains(&self.initial_energy) {
            return Err(ColonyError::InvalidConfig(
                "initial_energy must be in [0, 1]",
            ));
        }
        if self.spawn_spread <= 0.0 {
            return Err(ColonyError::InvalidConfig("spawn_spread must be positive"));
        }
        if self.consume_radius <= 0.0 || self.resource_decay < 0.0 {
            return Err(ColonyError::InvalidConfig(
                "consume_radius must be positive and resource_decay non-negative",
            ));
        }
        if self.eaten_threshold <= 0.0 || self.eaten_threshold > 1.0 {
            return Err(ColonyError::InvalidConfig(
                "eaten_threshold must be in (0, 1]",
            ));
        }
        if self.repro_threshold <= 0.0 || self.repro_threshold > 1.0 {
            return Err(ColonyError::InvalidConfig(
                "repro_threshold must be in (0, 1]",
            ));
        }
        if self.repro_cost <= 0.0 || self.repro_cost > self.repro_threshold {
            return Err(ColonyError::InvalidConfig(
                "repro_cost must be positive and not exceed repro_threshold",
            ));
        }
        if self.child_spawn_min <= 0.0 || self.child_spawn_max < self.child_spawn_min {
            return Err(ColonyError::InvalidConfig(
                "child spawn distances must be positive and ordered",
            ));
        }
        if self.preference_mutation < 0.0 {
            return Err(ColonyError::InvalidConfig(
                "preference_mutation must be non-negative",
            ));
        }
        if self.dissolve_radius_base <= 0.0
            || self.dissolve_radius_per_age < 0.0
            || self.dissolve_radius_max < self.dissolve_radius_base
        {
            return Err(ColonyError::InvalidConfig(
                "dissolution radii must be positive and ordered",
            ));
        }
        if self.dissolve_falloff < 1.0 {
            return Err(ColonyError::InvalidConfig(
                "dissolve_falloff must be at least 1",
            ));
        }
        if self.dissolve_color_gain < 0.0 || self.dissolve_alpha_gain < 0.0 {
            return Err(ColonyError::InvalidConfig(
                "dissolution gains must be non-negative",
            ));
        }
        if self.attract_strength < 0.0 {
            return Err(ColonyError::InvalidConfig(
                "attract_strength must be non-negative",
            ));
        }
        if self.history_capacity == 0 {
            return Err(ColonyError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok((self.grid_width, self.grid_height))
    }

    /// Returns the configured RNG, seeding from entropy if no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Telemetry snapshot recorded every `summary_interval` ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: u64,
    pub alive: u32,
    pub mean_energy: f32,
    pub births: u32,
    pub deaths: u32,
    pub eaten_cells: u32,
}

/// Per-slot output of the parallel force pass.
#[derive(Debug, Clone, Copy, Default)]
struct SlotForces {
    force: Vec2,
    repulsion: f32,
    intake: f32,
}

struct ChildSeed {
    position: Vec2,
    energy: f32,
    preference: [f32; 3],
}

/// The colony: particles, resource field, harvest ledger, and telemetry.
pub struct Colony {
    config: ColonyConfig,
    tick: u64,
    rng: SmallRng,
    particles: ParticleColumns,
    field: ResourceField,
    ledger: HarvestLedger,
    generation: GenerationCounter,
    births_since_summary: u32,
    deaths_since_summary: u32,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for Colony {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Colony")
            .field("tick", &self.tick)
            .field("alive", &self.particles.alive_count())
            .field("generation", &self.generation.current())
            .field("grid", &(self.field.width(), self.field.height()))
            .finish()
    }
}

impl Colony {
    /// Builds an empty colony over a blank field.
    pub fn new(config: ColonyConfig) -> Result<Self, ColonyError> {
        let (width, height) = config.grid_dimensions()?;
        let rng = config.seeded_rng();
        let capacity = (width as usize) * (height as usize);
        let field = ResourceField::new(width, height)?;
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            tick: 0,
            rng,
            particles: ParticleColumns::with_capacity(capacity),
            field,
            ledger: HarvestLedger::new(),
            generation: GenerationCounter::new(),
            births_since_summary: 0,
            deaths_since_summary: 0,
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Clears every slot and seeds `count` particles in a jittered disc
    /// around `center`. Zeroes the step counter, forgets the harvest
    /// ledger, and bumps the generation so in-flight digests go stale.
    pub fn reset(&mut self, count: usize, center: Vec2) {
        self.particles.reset_all();
        let spawn = count.min(self.particles.capacity());
        for slot in 0..spawn {
            let angle = self.rng.random_range(0.0..TAU);
            let radius = self.config.spawn_spread * self.rng.random::<f32>().sqrt();
            let offset = Vec2::new(angle.cos(), angle.sin()) * radius;
            let position = self.clamp_to_dish(center + offset);
            let preference = normalize_preference([
                self.rng.random::<f32>(),
                self.rng.random::<f32>(),
                self.rng.random::<f32>(),
            ]);
            self.particles.spawn_into(
                slot,
                position,
                self.config.initial_energy,
                0,
                preference,
            );
        }
        self.tick = 0;
        self.births_since_summary = 0;
        self.deaths_since_summary = 0;
        self.history.clear();
        self.ledger.clear();
        self.generation.bump();
    }

    /// Replaces the resource field with a resample of `source`, clearing
    /// the harvest ledger and bumping the generation.
    pub fn load_resource_image(&mut self, source: &RgbaImage) -> Result<(), ColonyError> {
        let replacement =
            ResourceField::from_image(source, self.field.width(), self.field.height())?;
        self.field = replacement;
        self.ledger.clear();
        self.generation.bump();
        Ok(())
    }

    /// Advances the simulation by one tick.
    ///
    /// `clock_rate` scales both motion and metabolism; a paused or
    /// non-positive clock leaves the colony untouched. The optional
    /// attractor pulls particles toward a point with linear falloff
    /// inside its radius.
    pub fn step(&mut self, clock_rate: f32, paused: bool, attractor: Option<Attractor>) {
        if paused || clock_rate <= 0.0 || !clock_rate.is_finite() {
            return;
        }
        let forces = self.compute_forces(clock_rate, attractor);
        self.apply_forces(&forces, clock_rate);
        self.tick += 1;
        let interval = u64::from(self.config.summary_interval);
        if interval > 0 && self.tick.is_multiple_of(interval) {
            self.record_summary();
        }
    }

    /// Parallel read-only pass: pairwise kernel and repulsion terms,
    /// resource gradient, attractor pull, and feeding intake per slot.
    fn compute_forces(&self, clock_rate: f32, attractor: Option<Attractor>) -> Vec<SlotForces> {
        let capacity = self.particles.capacity();
        let positions = self.particles.positions();
        let energies = self.particles.energy();
        let preferences = self.particles.preference();
        let alive: Vec<bool> = (0..capacity).map(|slot| self.particles.is_alive(slot)).collect();
        let field = &self.field;
        let cfg = &self.config;

        (0..capacity)
            .into_par_iter()
            .map(|slot| {
                if !alive[slot] {
                    return SlotForces::default();
                }
                let pos = positions[slot];
                let mut potential_u = 0.0f32;
                let mut potential_r = 0.0f32;
                let mut grad_u = Vec2::ZERO;
                let mut grad_r = Vec2::ZERO;

                for other in 0..capacity {
                    if other == slot || !alive[other] {
                        continue;
                    }
                    let mut delta = pos - positions[other];
                    let mut dist = delta.length();
                    if dist < COINCIDENT_EPS {
                        // Overlapping pair: fan out along a slot-keyed angle
                        // so both sides separate the same way every run.
                        let angle = slot as f32 * GOLDEN_ANGLE;
                        delta = Vec2::new(angle.cos(), angle.sin()) * COINCIDENT_EPS;
                        dist = COINCIDENT_EPS;
                    }
                    let dir = delta * (1.0 / dist);
                    potential_u +=
                        cfg.kernel_weight * kernel::bell(dist, cfg.kernel_mu, cfg.kernel_sigma);
                    grad_u += dir
                        * (cfg.kernel_weight
                            * kernel::bell_grad(dist, cfg.kernel_mu, cfg.kernel_sigma));
                    if dist < 1.0 {
                        potential_r += kernel::repulsion(dist, cfg.repulsion_strength);
                        grad_r += dir * kernel::repulsion_grad(dist, cfg.repulsion_strength);
                    }
                }

                let growth_slope =
                    kernel::growth_grad(potential_u, cfg.growth_mu, cfg.growth_sigma);
                let mut force = grad_u * growth_slope - grad_r;

                let hunger = 1.0 - energies[slot];
                let taste = field.taste_gradient(
                    pos,
                    preferences[slot],
                    cfg.taste_model,
                    cfg.hue_gate_degrees,
                );
                force += taste * (cfg.resource_pull * hunger);

                if let Some(attract) = attractor
                    && attract.radius > 0.0
                {
                    let to_target = attract.position - pos;
                    let dist = to_target.length();
                    if dist > f32::EPSILON && dist < attract.radius {
                        let falloff = 1.0 - dist / attract.radius;
                        force += to_target * (cfg.attract_strength * falloff / dist);
                    }
                }

                let intake = cfg.feed_rate * field.sample_remaining(pos) * clock_rate;
                SlotForces {
                    force,
                    repulsion: potential_r,
                    intake,
                }
            })
            .collect()
    }

    /// Serial write-back: damped Euler step, dish clamp, energy update.
    fn apply_forces(&mut self, forces: &[SlotForces], clock_rate: f32) {
        let dt = self.config.time_step * clock_rate;
        let momentum = self.config.momentum;
        let decay = self.config.energy_decay * clock_rate;
        for slot in 0..self.particles.capacity() {
            if !self.particles.is_alive(slot) {
                continue;
            }
            let entry = forces[slot];
            let pos = self.particles.positions()[slot];
            let prev = self.particles.prev_positions()[slot];
            let inertia = (pos - prev) * momentum;
            let next = self.clamp_to_dish(pos + inertia + entry.force * dt);
            self.particles.prev_positions_mut()[slot] = pos;
            self.particles.positions_mut()[slot] = next;
            self.particles.repulsion_mut()[slot] = entry.repulsion;
            let energy = self.particles.energy()[slot];
            self.particles.energy_mut()[slot] = clamp01(energy + entry.intake - decay);
        }
    }

    /// Gaussian consumption scatter around every live particle. Runs at
    /// the caller's cadence, independent of [`Colony::step`].
    pub fn consume_resources(&mut self) {
        let radius = self.config.consume_radius;
        let amount = self.config.resource_decay;
        for slot in 0..self.particles.capacity() {
            if !self.particles.is_alive(slot) {
                continue;
            }
            let pos = self.particles.positions()[slot];
            self.field.deplete_around(pos, radius, amount);
        }
    }

    /// Dissolves starved particles back into the field and empties their
    /// slots. Returns the number of deaths.
    pub fn process_deaths(&mut self) -> u32 {
        let mut dead: Vec<usize> = Vec::new();
        for slot in 0..self.particles.capacity() {
            if self.particles.is_alive(slot) && self.particles.energy()[slot] <= 0.0 {
                dead.push(slot);
            }
        }
        for &slot in &dead {
            let position = self.particles.positions()[slot];
            let age = self.particles.age(slot, self.tick) as f32;
            let radius = (self.config.dissolve_radius_base
                + self.config.dissolve_radius_per_age * age)
                .min(self.config.dissolve_radius_max);
            let preference = self.particles.preference()[slot];
            self.field.deposit_around(
                position,
                radius,
                self.config.dissolve_falloff,
                preference,
                self.config.dissolve_color_gain,
                self.config.dissolve_alpha_gain,
            );
            self.particles.clear_slot(slot);
        }
        let deaths = dead.len() as u32;
        self.deaths_since_summary += deaths;
        deaths
    }

    /// Batched reproduction pass. Eligible parents are matched round-robin
    /// against a shuffled list of empty slots; each parent pays the
    /// reproduction cost once per pass and is capped at
    /// `max_children_per_parent` children. Returns the number of births.
    pub fn process_reproduction(&mut self, max_children_per_parent: u32) -> u32 {
        if max_children_per_parent == 0 {
            return 0;
        }
        let now = self.tick;
        let mut parents: Vec<usize> = Vec::new();
        let mut empties: Vec<usize> = Vec::new();
        for slot in 0..self.particles.capacity() {
            if self.particles.is_alive(slot) {
                if self.particles.energy()[slot] >= self.config.repro_threshold
                    && self.particles.age(slot, now) >= self.config.repro_min_age
                {
                    parents.push(slot);
                }
            } else {
                empties.push(slot);
            }
        }
        if parents.is_empty() || empties.is_empty() {
            return 0;
        }

        empties.shuffle(&mut self.rng);
        let mut children_of: Vec<u32> = vec![0; parents.len()];
        let mut orders: Vec<(usize, usize)> = Vec::new();
        let mut next_empty = 0usize;
        'rounds: loop {
            let mut assigned_any = false;
            for (parent_idx, &parent_slot) in parents.iter().enumerate() {
                if children_of[parent_idx] >= max_children_per_parent {
                    continue;
                }
                let Some(&empty_slot) = empties.get(next_empty) else {
                    break 'rounds;
                };
                next_empty += 1;
                children_of[parent_idx] += 1;
                orders.push((empty_slot, parent_slot));
                assigned_any = true;
            }
            if !assigned_any {
                break;
            }
        }

        for (parent_idx, &parent_slot) in parents.iter().enumerate() {
            if children_of[parent_idx] > 0 {
                let energy = self.particles.energy()[parent_slot];
                self.particles.energy_mut()[parent_slot] =
                    clamp01(energy - self.config.repro_cost);
            }
        }

        let births = orders.len() as u32;
        for (empty_slot, parent_slot) in orders {
            let child = self.build_child(parent_slot);
            self.particles.spawn_into(
                empty_slot,
                child.position,
                child.energy,
                now,
                child.preference,
            );
        }
        self.births_since_summary += births;
        births
    }

    fn build_child(&mut self, parent_slot: usize) -> ChildSeed {
        let parent_pos = self.particles.positions()[parent_slot];
        let angle = self.rng.random_range(0.0..TAU);
        let distance = self
            .rng
            .random_range(self.config.child_spawn_min..=self.config.child_spawn_max);
        let offset = Vec2::new(angle.cos(), angle.sin()) * distance;
        let position = self.clamp_to_dish(parent_pos + offset);

        let mut preference = self.particles.preference()[parent_slot];
        if self.config.preference_mutation > 0.0 {
            for channel in &mut preference {
                // Triangular delta: bounded, zero-mean, cheap.
                let delta = (self.rng.random::<f32>() + self.rng.random::<f32>() - 1.0)
                    * self.config.preference_mutation;
                *channel = (*channel + delta).clamp(0.0, 1.0);
            }
        }
        ChildSeed {
            position,
            energy: self.config.repro_cost * 0.5,
            preference: normalize_preference(preference),
        }
    }

    /// Samples currently available to the reconstruction engine.
    pub fn harvested_pixels(
        &mut self,
        force_refresh: bool,
        excluded: &HashSet<SampleKey>,
    ) -> Vec<HarvestedSample> {
        self.ledger
            .collect(&self.field, self.config.eaten_threshold, force_refresh, excluded)
    }

    /// Permanently retires sample keys after a reconstruction was accepted.
    pub fn mark_digested(&mut self, keys: impl IntoIterator<Item = SampleKey>) {
        self.ledger.mark_digested(keys);
    }

    fn record_summary(&mut self) {
        let alive = self.particles.alive_count();
        let mean_energy = if alive > 0 {
            let total: f32 = self
                .particles
                .alive_slots()
                .map(|slot| self.particles.energy()[slot])
                .sum();
            total / alive as f32
        } else {
            0.0
        };
        let summary = TickSummary {
            tick: self.tick,
            alive,
            mean_energy,
            births: std::mem::take(&mut self.births_since_summary),
            deaths: std::mem::take(&mut self.deaths_since_summary),
            eaten_cells: self.field.eaten_count(self.config.eaten_threshold) as u32,
        };
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    /// Center of the dish in position space.
    #[must_use]
    pub fn dish_center(&self) -> Vec2 {
        Vec2::new(
            self.field.width() as f32 * 0.5,
            self.field.height() as f32 * 0.5,
        )
    }

    fn clamp_to_dish(&self, pos: Vec2) -> Vec2 {
        let center = self.dish_center();
        if !pos.is_finite() {
            return center;
        }
        let delta = pos - center;
        let dist = delta.length();
        if dist > self.config.dish_radius {
            center + delta * (self.config.dish_radius / dist)
        } else {
            pos
        }
    }

    #[must_use]
    pub fn config(&self) -> &ColonyConfig {
        &self.config
    }

    /// Mutable access to the configuration (for hot edits).
    #[must_use]
    pub fn config_mut(&mut self) -> &mut ColonyConfig {
        &mut self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Current generation value.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    /// Cloneable handle onto the generation counter for async consumers.
    #[must_use]
    pub fn generation_counter(&self) -> GenerationCounter {
        self.generation.clone()
    }

    #[must_use]
    pub fn alive_count(&self) -> u32 {
        self.particles.alive_count()
    }

    #[must_use]
    pub fn particles(&self) -> &ParticleColumns {
        &self.particles
    }

    #[must_use]
    pub fn particles_mut(&mut self) -> &mut ParticleColumns {
        &mut self.particles
    }

    #[must_use]
    pub fn resource(&self) -> &ResourceField {
        &self.field
    }

    #[must_use]
    pub fn resource_mut(&mut self) -> &mut ResourceField {
        &mut self.field
    }

    /// Recorded telemetry summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }
}
