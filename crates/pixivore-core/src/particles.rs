//! Column-major particle storage.
//!
//! Slots are fixed at colony capacity; liveness is encoded by parking the
//! position at [`VOID_POSITION`], so a slot index stays a stable identity
//! for the whole session. Only the life-cycle passes flip liveness.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub};

/// Sentinel coordinate for empty slots, far outside any dish.
pub const VOID_POSITION: f32 = -10_000.0;

/// 2D vector in grid-cell units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn length_sq(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    #[must_use]
    pub fn length(self) -> f32 {
        self.length_sq().sqrt()
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Optional pull toward a point, applied with linear falloff inside
/// `radius`. A non-positive radius disables the pull.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attractor {
    pub position: Vec2,
    pub radius: f32,
}

/// SoA storage for every particle slot in the colony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleColumns {
    positions: Vec<Vec2>,
    prev_positions: Vec<Vec2>,
    repulsion: Vec<f32>,
    energy: Vec<f32>,
    birth_step: Vec<u64>,
    preference: Vec<[f32; 3]>,
}

impl ParticleColumns {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let void = Vec2::new(VOID_POSITION, VOID_POSITION);
        Self {
            positions: vec![void; capacity],
            prev_positions: vec![void; capacity],
            repulsion: vec![0.0; capacity],
            energy: vec![0.0; capacity],
            birth_step: vec![0; capacity],
            preference: vec![[0.0; 3]; capacity],
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_alive(&self, slot: usize) -> bool {
        self.positions[slot].x != VOID_POSITION
    }

    /// Slots currently holding a live particle, ascending.
    pub fn alive_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity()).filter(|&slot| self.is_alive(slot))
    }

    #[must_use]
    pub fn alive_count(&self) -> u32 {
        self.alive_slots().count() as u32
    }

    /// Ticks lived by the particle in `slot` as of step `now`.
    #[must_use]
    pub fn age(&self, slot: usize, now: u64) -> u64 {
        now.saturating_sub(self.birth_step[slot])
    }

    #[must_use]
    pub fn positions(&self) -> &[Vec2] {
        &self.positions
    }

    #[must_use]
    pub fn positions_mut(&mut self) -> &mut [Vec2] {
        &mut self.positions
    }

    #[must_use]
    pub fn prev_positions(&self) -> &[Vec2] {
        &self.prev_positions
    }

    #[must_use]
    pub fn prev_positions_mut(&mut self) -> &mut [Vec2] {
        &mut self.prev_positions
    }

    #[must_use]
    pub fn repulsion(&self) -> &[f32] {
        &self.repulsion
    }

    #[must_use]
    pub fn repulsion_mut(&mut self) -> &mut [f32] {
        &mut self.repulsion
    }

    #[must_use]
    pub fn energy(&self) -> &[f32] {
        &self.energy
    }

    #[must_use]
    pub fn energy_mut(&mut self) -> &mut [f32] {
        &mut self.energy
    }

    #[must_use]
    pub fn birth_steps(&self) -> &[u64] {
        &self.birth_step
    }

    #[must_use]
    pub fn preference(&self) -> &[[f32; 3]] {
        &self.preference
    }

    #[must_use]
    pub fn preference_mut(&mut self) -> &mut [[f32; 3]] {
        &mut self.preference
    }

    /// Places a live particle into `slot`, overwriting whatever was there.
    pub fn spawn_into(
        &mut self,
        slot: usize,
        position: Vec2,
        energy: f32,
        birth_step: u64,
        preference: [f32; 3],
    ) {
        self.positions[slot] = position;
        self.prev_positions[slot] = position;
        self.repulsion[slot] = 0.0;
        self.energy[slot] = energy;
        self.birth_step[slot] = birth_step;
        self.preference[slot] = preference;
    }

    /// Returns `slot` to the empty state.
    pub fn clear_slot(&mut self, slot: usize) {
        let void = Vec2::new(VOID_POSITION, VOID_POSITION);
        self.positions[slot] = void;
        self.prev_positions[slot] = void;
        self.repulsion[slot] = 0.0;
        self.energy[slot] = 0.0;
        self.birth_step[slot] = 0;
        self.preference[slot] = [0.0; 3];
    }

    /// Empties every slot.
    pub fn reset_all(&mut self) {
        for slot in 0..self.capacity() {
            self.clear_slot(slot);
        }
    }
}
