//! The resource field: a dense color grid that doubles as the level image.
//!
//! Each cell carries its color and a `remaining` alpha in `[0, 1]`.
//! Consumption only ever lowers `remaining`; death dissolution adds color
//! and alpha back, saturating at one. A cell whose `remaining` falls below
//! the eaten threshold becomes a harvestable sample.

use crate::ColonyError;
use crate::particles::Vec2;
use image::RgbaImage;
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};

/// How a particle's taste preference weights nearby resource cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TasteModel {
    /// Preference·color dot product scaled by remaining alpha.
    Dot,
    /// Full weight inside a hue window around the preference hue, zero
    /// outside; near-gray cells get a small neutral weight.
    HueGated,
}

/// Taste weight given to hue-less (near-gray) cells under
/// [`TasteModel::HueGated`].
const NEUTRAL_TASTE: f32 = 0.25;

/// Chroma below which a color has no meaningful hue.
const MIN_CHROMA: f32 = 0.05;

/// One resource cell. All channels live in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceCell {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub remaining: f32,
}

impl ResourceCell {
    #[must_use]
    pub const fn rgb(&self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    #[must_use]
    pub fn is_eaten(&self, threshold: f32) -> bool {
        self.remaining < threshold
    }
}

/// Dense `width × height` resource grid in row-major order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceField {
    width: u32,
    height: u32,
    cells: Vec<ResourceCell>,
}

impl ResourceField {
    /// Construct a blank (fully eaten) field.
    pub fn new(width: u32, height: u32) -> Result<Self, ColonyError> {
        if width == 0 || height == 0 {
            return Err(ColonyError::InvalidConfig(
                "resource grid dimensions must be non-zero",
            ));
        }
        Ok(Self {
            width,
            height,
            cells: vec![ResourceCell::default(); (width as usize) * (height as usize)],
        })
    }

    /// Resample an arbitrary-size source image onto a `width × height`
    /// field. Cell colors come from the resized pixels; `remaining` seeds
    /// from source alpha, so fully transparent regions start out eaten.
    pub fn from_image(source: &RgbaImage, width: u32, height: u32) -> Result<Self, ColonyError> {
        if source.width() == 0 || source.height() == 0 {
            return Err(ColonyError::EmptyImage);
        }
        let mut field = Self::new(width, height)?;
        let resized = imageops::resize(source, width, height, FilterType::Triangle);
        for (cell, pixel) in field.cells.iter_mut().zip(resized.pixels()) {
            let [r, g, b, a] = pixel.0;
            *cell = ResourceCell {
                r: f32::from(r) / 255.0,
                g: f32::from(g) / 255.0,
                b: f32::from(b) / 255.0,
                remaining: f32::from(a) / 255.0,
            };
        }
        Ok(field)
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn cells(&self) -> &[ResourceCell] {
        &self.cells
    }

    #[must_use]
    pub fn cells_mut(&mut self) -> &mut [ResourceCell] {
        &mut self.cells
    }

    /// Flat index for `(x, y)` without bounds checks.
    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }

    /// Immutable access to a specific cell.
    pub fn get(&self, x: u32, y: u32) -> Option<ResourceCell> {
        if x < self.width && y < self.height {
            Some(self.cells[self.offset(x, y)])
        } else {
            None
        }
    }

    /// Mutable access to a specific cell.
    pub fn get_mut(&mut self, x: u32, y: u32) -> Option<&mut ResourceCell> {
        if x < self.width && y < self.height {
            let idx = self.offset(x, y);
            Some(&mut self.cells[idx])
        } else {
            None
        }
    }

    /// The cell containing `pos`, if any. Cell `(x, y)` spans
    /// `[x, x+1) × [y, y+1)` in position space.
    pub fn cell_at(&self, pos: Vec2) -> Option<(u32, u32)> {
        if !pos.is_finite() || pos.x < 0.0 || pos.y < 0.0 {
            return None;
        }
        let x = pos.x.floor() as u32;
        let y = pos.y.floor() as u32;
        (x < self.width && y < self.height).then_some((x, y))
    }

    /// Remaining alpha under `pos`, zero outside the grid.
    #[must_use]
    pub fn sample_remaining(&self, pos: Vec2) -> f32 {
        match self.cell_at(pos) {
            Some((x, y)) => self.cells[self.offset(x, y)].remaining,
            None => 0.0,
        }
    }

    /// Central-difference gradient of the taste-weighted resource value
    /// at `pos`. Out-of-grid samples read as zero, so the gradient bends
    /// inward near the boundary.
    #[must_use]
    pub fn taste_gradient(
        &self,
        pos: Vec2,
        preference: [f32; 3],
        model: TasteModel,
        hue_gate_degrees: f32,
    ) -> Vec2 {
        const H: f32 = 1.0;
        let sample = |p: Vec2| -> f32 {
            match self.cell_at(p) {
                Some((x, y)) => {
                    taste_weight(model, hue_gate_degrees, preference, &self.cells[self.offset(x, y)])
                }
                None => 0.0,
            }
        };
        let gx = (sample(pos + Vec2::new(H, 0.0)) - sample(pos - Vec2::new(H, 0.0))) * 0.5;
        let gy = (sample(pos + Vec2::new(0.0, H)) - sample(pos - Vec2::new(0.0, H))) * 0.5;
        Vec2::new(gx, gy)
    }

    /// Gaussian consumption scatter: every cell whose center lies within
    /// `radius` of `pos` loses `amount · exp(-d²/4)` of its remaining
    /// alpha, floored at zero.
    pub fn deplete_around(&mut self, pos: Vec2, radius: f32, amount: f32) {
        if amount <= 0.0 || radius <= 0.0 || !pos.is_finite() {
            return;
        }
        let radius_sq = radius * radius;
        self.for_cells_near(pos, radius, |cell, dist_sq| {
            if dist_sq <= radius_sq {
                cell.remaining = (cell.remaining - amount * (-dist_sq / 4.0).exp()).max(0.0);
            }
        });
    }

    /// Dissolution deposit: adds `color` and alpha back into the field
    /// with weight `exp(-(d/radius)^falloff)`, each channel saturating
    /// at one.
    pub fn deposit_around(
        &mut self,
        pos: Vec2,
        radius: f32,
        falloff: f32,
        color: [f32; 3],
        color_gain: f32,
        alpha_gain: f32,
    ) {
        if radius <= 0.0 || !pos.is_finite() {
            return;
        }
        self.for_cells_near(pos, radius * 3.0, |cell, dist_sq| {
            let weight = (-(dist_sq.sqrt() / radius).powf(falloff)).exp();
            if weight < 1e-3 {
                return;
            }
            cell.r = (cell.r + weight * color[0] * color_gain).min(1.0);
            cell.g = (cell.g + weight * color[1] * color_gain).min(1.0);
            cell.b = (cell.b + weight * color[2] * color_gain).min(1.0);
            cell.remaining = (cell.remaining + weight * alpha_gain).min(1.0);
        });
    }

    /// Number of cells currently below the eaten threshold.
    #[must_use]
    pub fn eaten_count(&self, threshold: f32) -> usize {
        self.cells
            .iter()
            .filter(|cell| cell.is_eaten(threshold))
            .count()
    }

    /// Visit every cell within `reach` of `pos` with its squared distance
    /// from `pos` to the cell center.
    fn for_cells_near(&mut self, pos: Vec2, reach: f32, mut visit: impl FnMut(&mut ResourceCell, f32)) {
        let span = reach.ceil() as i64;
        let cx = pos.x.floor() as i64;
        let cy = pos.y.floor() as i64;
        for dy in -span..=span {
            let y = cy + dy;
            if y < 0 || y >= i64::from(self.height) {
                continue;
            }
            for dx in -span..=span {
                let x = cx + dx;
                if x < 0 || x >= i64::from(self.width) {
                    continue;
                }
                let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let dist_sq = (center - pos).length_sq();
                let idx = self.offset(x as u32, y as u32);
                visit(&mut self.cells[idx], dist_sq);
            }
        }
    }
}

/// Taste value of one cell for a given preference.
fn taste_weight(model: TasteModel, gate_degrees: f32, preference: [f32; 3], cell: &ResourceCell) -> f32 {
    if cell.remaining <= 0.0 {
        return 0.0;
    }
    match model {
        TasteModel::Dot => {
            let dot = preference[0] * cell.r + preference[1] * cell.g + preference[2] * cell.b;
            dot * cell.remaining
        }
        TasteModel::HueGated => match (hue_of(preference), hue_of(cell.rgb())) {
            (Some(pref_hue), Some(cell_hue)) => {
                let gap = hue_distance(pref_hue, cell_hue);
                (1.0 - gap / gate_degrees).max(0.0) * cell.remaining
            }
            _ => NEUTRAL_TASTE * cell.remaining,
        },
    }
}

/// Hue of an RGB triple in degrees, `None` when the color is too gray for
/// hue to mean anything.
fn hue_of(rgb: [f32; 3]) -> Option<f32> {
    let [r, g, b] = rgb;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let chroma = max - min;
    if chroma < MIN_CHROMA {
        return None;
    }
    let hue = if (max - r).abs() < f32::EPSILON {
        60.0 * ((g - b) / chroma).rem_euclid(6.0)
    } else if (max - g).abs() < f32::EPSILON {
        60.0 * ((b - r) / chroma + 2.0)
    } else {
        60.0 * ((r - g) / chroma + 4.0)
    };
    Some(hue.rem_euclid(360.0))
}

/// Shortest angular distance between two hues, in degrees.
fn hue_distance(a: f32, b: f32) -> f32 {
    let direct = (a - b).abs() % 360.0;
    direct.min(360.0 - direct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid_image(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(rgba))
    }

    #[test]
    fn from_image_seeds_color_and_alpha() {
        let source = solid_image(10, 10, [255, 128, 0, 255]);
        let field = ResourceField::from_image(&source, 4, 4).expect("field");
        let cell = field.get(2, 2).expect("cell");
        assert!((cell.r - 1.0).abs() < 0.01);
        assert!((cell.g - 128.0 / 255.0).abs() < 0.01);
        assert!(cell.b < 0.01);
        assert!((cell.remaining - 1.0).abs() < 0.01);
        assert!(!cell.is_eaten(0.1));
    }

    #[test]
    fn zero_size_source_is_rejected() {
        let source = RgbaImage::new(0, 0);
        assert!(matches!(
            ResourceField::from_image(&source, 4, 4),
            Err(ColonyError::EmptyImage)
        ));
    }

    #[test]
    fn transparent_source_starts_eaten() {
        let source = solid_image(8, 8, [200, 200, 200, 0]);
        let field = ResourceField::from_image(&source, 4, 4).expect("field");
        assert_eq!(field.eaten_count(0.1), 16);
    }

    #[test]
    fn cell_at_respects_bounds() {
        let field = ResourceField::new(4, 4).expect("field");
        assert_eq!(field.cell_at(Vec2::new(0.5, 0.5)), Some((0, 0)));
        assert_eq!(field.cell_at(Vec2::new(3.9, 3.9)), Some((3, 3)));
        assert_eq!(field.cell_at(Vec2::new(-0.1, 1.0)), None);
        assert_eq!(field.cell_at(Vec2::new(4.0, 1.0)), None);
        assert_eq!(field.cell_at(Vec2::new(f32::NAN, 1.0)), None);
    }

    #[test]
    fn depletion_is_strongest_at_the_center() {
        let source = solid_image(8, 8, [255, 255, 255, 255]);
        let mut field = ResourceField::from_image(&source, 8, 8).expect("field");
        let pos = Vec2::new(4.5, 4.5);
        field.deplete_around(pos, 2.5, 0.4);

        let center = field.get(4, 4).expect("cell").remaining;
        let edge = field.get(6, 4).expect("cell").remaining;
        assert!(center < edge, "center {center} should drop below edge {edge}");
        assert!(center >= 0.0);
    }

    #[test]
    fn depletion_never_goes_negative() {
        let source = solid_image(4, 4, [255, 255, 255, 255]);
        let mut field = ResourceField::from_image(&source, 4, 4).expect("field");
        for _ in 0..200 {
            field.deplete_around(Vec2::new(2.0, 2.0), 2.5, 0.5);
        }
        assert!(field.cells().iter().all(|cell| cell.remaining >= 0.0));
    }

    #[test]
    fn deposit_saturates_at_one() {
        let mut field = ResourceField::new(6, 6).expect("field");
        for _ in 0..50 {
            field.deposit_around(Vec2::new(3.0, 3.0), 2.0, 2.0, [1.0, 0.2, 0.9], 0.5, 0.5);
        }
        let cell = field.get(2, 2).expect("cell");
        assert!(cell.r <= 1.0 && cell.g <= 1.0 && cell.b <= 1.0);
        assert!(cell.remaining <= 1.0);
        assert!(cell.remaining > 0.5, "deposit should restore alpha");
    }

    #[test]
    fn dot_taste_gradient_points_at_food() {
        let mut field = ResourceField::new(5, 5).expect("field");
        // Single bright red cell to the east of the probe point.
        if let Some(cell) = field.get_mut(3, 2) {
            *cell = ResourceCell { r: 1.0, g: 0.0, b: 0.0, remaining: 1.0 };
        }
        let grad = field.taste_gradient(
            Vec2::new(2.5, 2.5),
            [1.0, 0.0, 0.0],
            TasteModel::Dot,
            60.0,
        );
        assert!(grad.x > 0.0, "gradient should point east, got {grad:?}");
        assert!(grad.y.abs() < 1e-6);
    }

    #[test]
    fn hue_gate_rejects_distant_hues() {
        let red = ResourceCell { r: 1.0, g: 0.0, b: 0.0, remaining: 1.0 };
        let cyan = ResourceCell { r: 0.0, g: 1.0, b: 1.0, remaining: 1.0 };
        let pref = [1.0, 0.0, 0.0];
        let liked = taste_weight(TasteModel::HueGated, 60.0, pref, &red);
        let disliked = taste_weight(TasteModel::HueGated, 60.0, pref, &cyan);
        assert!(liked > 0.9);
        assert_eq!(disliked, 0.0);
    }

    #[test]
    fn gray_cells_get_neutral_taste() {
        let gray = ResourceCell { r: 0.5, g: 0.5, b: 0.5, remaining: 0.8 };
        let weight = taste_weight(TasteModel::HueGated, 60.0, [1.0, 0.0, 0.0], &gray);
        assert!((weight - NEUTRAL_TASTE * 0.8).abs() < 1e-6);
    }

    #[test]
    fn hue_math_wraps() {
        let red = hue_of([1.0, 0.0, 0.0]).expect("red hue");
        let magenta_ish = hue_of([1.0, 0.0, 0.5]).expect("hue");
        assert!(red.abs() < 1e-3);
        assert!(hue_distance(red, magenta_ish) < 60.0);
        assert!((hue_distance(10.0, 350.0) - 20.0).abs() < 1e-3);
        assert!(hue_of([0.5, 0.5, 0.52]).is_none());
    }
}
