//! Kernel math shared by the force pass.
//!
//! Everything here is a pure function of its arguments so the rayon force
//! pass can call into it without touching colony state. Distances are in
//! grid-cell units.

use std::f32::consts::TAU;

/// Smooth bell kernel `exp(-((r - mu) / sigma)^2)`, peaking at `r = mu`.
#[must_use]
pub fn bell(r: f32, mu: f32, sigma: f32) -> f32 {
    let t = (r - mu) / sigma;
    (-t * t).exp()
}

/// Radial derivative of [`bell`].
#[must_use]
pub fn bell_grad(r: f32, mu: f32, sigma: f32) -> f32 {
    let t = (r - mu) / sigma;
    -2.0 * t / sigma * (-t * t).exp()
}

/// Growth mapping applied to a particle's summed kernel field.
///
/// This is a second bell centred on the comfortable field strength `mu`:
/// particles whose neighbourhood sum sits at `mu` are in equilibrium, and
/// the gradient of this mapping steers them toward it.
#[must_use]
pub fn growth(u: f32, mu: f32, sigma: f32) -> f32 {
    bell(u, mu, sigma)
}

/// Derivative of [`growth`] with respect to the field sum.
#[must_use]
pub fn growth_grad(u: f32, mu: f32, sigma: f32) -> f32 {
    bell_grad(u, mu, sigma)
}

/// Numeric normalization coefficient: the planar mass `∫ bell(r)·2πr dr`
/// of the kernel ring, integrated out to `mu + 4σ` where the tail is
/// negligible.
#[must_use]
pub fn ring_mass(mu: f32, sigma: f32) -> f32 {
    const STEPS: usize = 1024;
    let upper = (mu + 4.0 * sigma).max(sigma);
    let dr = upper / STEPS as f32;
    let mut sum = 0.0f32;
    for i in 0..STEPS {
        let r0 = i as f32 * dr;
        let r1 = r0 + dr;
        let f0 = bell(r0, mu, sigma) * TAU * r0;
        let f1 = bell(r1, mu, sigma) * TAU * r1;
        sum += 0.5 * (f0 + f1) * dr;
    }
    sum
}

/// Kernel weight that normalizes the ring mass to one, so the summed field
/// of a uniformly surrounded particle stays near unity regardless of the
/// kernel's shape parameters.
#[must_use]
pub fn normalized_weight(mu: f32, sigma: f32) -> f32 {
    let mass = ring_mass(mu, sigma);
    if mass > f32::EPSILON { 1.0 / mass } else { 0.0 }
}

/// Short-range repulsion potential `c/2 · (1 - r)^2`, active below unit
/// distance.
#[must_use]
pub fn repulsion(r: f32, c: f32) -> f32 {
    if r < 1.0 {
        let t = 1.0 - r;
        0.5 * c * t * t
    } else {
        0.0
    }
}

/// Radial derivative of [`repulsion`].
#[must_use]
pub fn repulsion_grad(r: f32, c: f32) -> f32 {
    if r < 1.0 { -c * (1.0 - r) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finite_difference(f: impl Fn(f32) -> f32, r: f32) -> f32 {
        const H: f32 = 1e-3;
        (f(r + H) - f(r - H)) / (2.0 * H)
    }

    #[test]
    fn bell_peaks_at_mu() {
        assert!((bell(4.0, 4.0, 1.0) - 1.0).abs() < 1e-6);
        assert!(bell(2.0, 4.0, 1.0) < 1.0);
        assert!(bell(6.0, 4.0, 1.0) < 1.0);
        assert!((bell(2.0, 4.0, 1.0) - bell(6.0, 4.0, 1.0)).abs() < 1e-6);
    }

    #[test]
    fn bell_grad_matches_finite_difference() {
        for &r in &[0.5, 2.0, 3.9, 4.0, 4.1, 7.0] {
            let analytic = bell_grad(r, 4.0, 1.0);
            let numeric = finite_difference(|x| bell(x, 4.0, 1.0), r);
            assert!(
                (analytic - numeric).abs() < 1e-3,
                "grad mismatch at r={r}: {analytic} vs {numeric}"
            );
        }
    }

    #[test]
    fn bell_grad_changes_sign_at_peak() {
        assert!(bell_grad(3.5, 4.0, 1.0) > 0.0);
        assert!(bell_grad(4.5, 4.0, 1.0) < 0.0);
        assert!(bell_grad(4.0, 4.0, 1.0).abs() < 1e-6);
    }

    #[test]
    fn growth_steers_toward_its_peak() {
        // Below the comfortable field strength the slope is positive,
        // above it negative, so particles seek u = mu.
        assert!(growth_grad(0.3, 0.6, 0.15) > 0.0);
        assert!(growth_grad(0.9, 0.6, 0.15) < 0.0);
        assert!((growth(0.6, 0.6, 0.15) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ring_mass_grows_with_radius() {
        let near = ring_mass(2.0, 1.0);
        let far = ring_mass(6.0, 1.0);
        assert!(near > 0.0);
        assert!(far > near);
    }

    #[test]
    fn normalized_weight_inverts_ring_mass() {
        let w = normalized_weight(4.0, 1.0);
        assert!((w * ring_mass(4.0, 1.0) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn repulsion_vanishes_beyond_unit_distance() {
        assert_eq!(repulsion(1.0, 1.0), 0.0);
        assert_eq!(repulsion(2.5, 1.0), 0.0);
        assert!(repulsion(0.2, 1.0) > repulsion(0.8, 1.0));
    }

    #[test]
    fn repulsion_grad_matches_finite_difference() {
        for &r in &[0.1, 0.4, 0.9] {
            let analytic = repulsion_grad(r, 1.0);
            let numeric = finite_difference(|x| repulsion(x, 1.0), r);
            assert!((analytic - numeric).abs() < 1e-3);
        }
    }
}
