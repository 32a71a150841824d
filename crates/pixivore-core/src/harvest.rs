//! Harvest ledger: which eaten cells are still available as samples.
//!
//! The full-grid scan is the expensive part, so its result is cached and
//! only redone on demand. Digested keys accumulate for the whole session
//! (one sample feeds one reconstruction pixel, ever) and are subtracted on
//! the way out together with any caller-side exclusions.

use crate::field::ResourceField;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Stable identity of a harvested sample: its grid coordinate.
pub type SampleKey = (u32, u32);

/// A color sample freed by eating a resource cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HarvestedSample {
    pub key: SampleKey,
    pub rgb: [f32; 3],
}

/// Cached view of the harvestable samples in a field.
#[derive(Debug, Default)]
pub struct HarvestLedger {
    cache: Vec<HarvestedSample>,
    scanned: bool,
    digested: HashSet<SampleKey>,
}

impl HarvestLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples currently available: eaten cells minus digested keys minus
    /// `excluded`. Rescans the field only when forced or never scanned.
    /// Returns an owned vector so callers can hand it to a worker thread.
    pub fn collect(
        &mut self,
        field: &ResourceField,
        eaten_threshold: f32,
        force_refresh: bool,
        excluded: &HashSet<SampleKey>,
    ) -> Vec<HarvestedSample> {
        if force_refresh || !self.scanned {
            self.rescan(field, eaten_threshold);
        }
        self.cache
            .iter()
            .filter(|sample| {
                !self.digested.contains(&sample.key) && !excluded.contains(&sample.key)
            })
            .copied()
            .collect()
    }

    fn rescan(&mut self, field: &ResourceField, eaten_threshold: f32) {
        self.cache.clear();
        for y in 0..field.height() {
            for x in 0..field.width() {
                if let Some(cell) = field.get(x, y)
                    && cell.is_eaten(eaten_threshold)
                {
                    self.cache.push(HarvestedSample {
                        key: (x, y),
                        rgb: cell.rgb(),
                    });
                }
            }
        }
        self.scanned = true;
    }

    /// Permanently retires the given sample keys.
    pub fn mark_digested(&mut self, keys: impl IntoIterator<Item = SampleKey>) {
        self.digested.extend(keys);
    }

    #[must_use]
    pub fn digested_count(&self) -> usize {
        self.digested.len()
    }

    /// Drops the cache and the digested set, for reset/reload.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.scanned = false;
        self.digested.clear();
    }
}
