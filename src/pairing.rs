//! Pairing Hamiltonian with equally spaced, doubly degenerate levels.
//!
//! Spin-orbital `p` belongs to level `p / 2` with spin `p % 2`. The one-body part is `spacing * (p / 2)`; the
//! two-body part scatters a spin-paired couple from one level to another with strength `-g / 2`.

use crate::prelude::*;

/// Antisymmetrized pairing interaction `u[p, q, r, s]` on `2 * nlevels` spin-orbitals.
pub fn get_pairing_eri(nlevels: usize, g: f64) -> Tsr {
    let nmo = 2 * nlevels;
    let device = DeviceTsr::default();

    let mut u: Tsr = rt::zeros(([nmo, nmo, nmo, nmo], &device));
    for (lq, lr) in iproduct!(0..nlevels, 0..nlevels) {
        // (p, q) is the pair on level lq, (r, s) on level lr
        for (sp, sr) in iproduct!(0..2, 0..2) {
            let (p, q) = (2 * lq + sp, 2 * lq + 1 - sp);
            let (r, s) = (2 * lr + sr, 2 * lr + 1 - sr);
            let sign = if sp == sr { 1.0 } else { -1.0 };
            u[[p, q, r, s]] = -0.5 * g * sign;
        }
    }
    u
}

/// One-body matrix `h[p, p] = spacing * (p / 2)`.
pub fn get_pairing_hcore(nlevels: usize, spacing: f64) -> Tsr {
    let nmo = 2 * nlevels;
    let device = DeviceTsr::default();

    let mut h: Tsr = rt::zeros(([nmo, nmo], &device));
    for p in 0..nmo {
        h[[p, p]] = spacing * (p / 2) as f64;
    }
    h
}

/// Pairing model with `npairs` pairs filling the lowest levels.
pub fn pairing_model(nlevels: usize, npairs: usize, spacing: f64, g: f64) -> CCDInfo {
    CCDInfo { h: get_pairing_hcore(nlevels, spacing), u: get_pairing_eri(nlevels, g), nocc: 2 * npairs }
}
