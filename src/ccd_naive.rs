//! Direct evaluation of the CCD residual and energy, with every intermediate expanded inline.
//!
//! This is orders of magnitude slower than the factorized evaluation in [`crate::ccd`] and only meant as a
//! correctness reference for small systems.

use crate::prelude::*;

/// `g(t2)` entry by entry, without the chi intermediates.
pub fn get_ccd_residual_naive(mol_info: &CCDInfo, t2: &Tsr) -> Tsr {
    let nocc = mol_info.nocc();
    let nvir = mol_info.nvir();
    let o = nocc;
    let h = &mol_info.h;
    let u = &mol_info.u;
    let device = t2.device().clone();

    let t = |a: usize, b: usize, i: usize, j: usize| t2[[a, b, i, j]];
    let v = |p: usize, q: usize, r: usize, s: usize| u[[p, q, r, s]];
    let fv = |a: usize, c: usize| if a == c { 0.0 } else { h[[o + a, o + c]] };
    let fo = |k: usize, i: usize| if k == i { 0.0 } else { h[[k, i]] };

    let r1 = |a, b, i, j| (0..nvir).map(|c| fv(a, c) * t(b, c, j, i)).sum::<f64>();
    let r2 = |a, b, i, j| (0..nocc).map(|k| fo(k, i) * t(b, a, j, k)).sum::<f64>();
    let r3 = |a, b, i, j| {
        0.5 * iproduct!(0..nocc, 0..nocc, 0..nvir, 0..nvir)
            .map(|(m, mm, d, c)| t(b, a, i, m) * t(d, c, j, mm) * v(mm, m, o + d, o + c))
            .sum::<f64>()
    };
    let r4 = |a, b, i, j| {
        iproduct!(0..nvir, 0..nvir)
            .map(|(d, c)| {
                let quad = iproduct!(0..nocc, 0..nocc).map(|(m, n)| t(b, a, m, n) * v(m, n, o + d, o + c)).sum::<f64>();
                t(d, c, j, i) * (0.5 * v(o + b, o + a, o + d, o + c) + 0.25 * quad)
            })
            .sum::<f64>()
    };
    let r5 = |a, b, i, j| {
        iproduct!(0..nvir, 0..nocc)
            .map(|(c, m)| {
                let quad = iproduct!(0..nvir, 0..nocc).map(|(d, n)| t(b, d, j, n) * v(m, n, o + d, o + c)).sum::<f64>();
                t(a, c, i, m) * (v(o + b, m, j, o + c) - 0.5 * quad)
            })
            .sum::<f64>()
    };
    let r6 = |a, b, i, j| {
        (0..nvir)
            .map(|c| {
                let lin = (0..nocc).map(|m| v(o + b, m, o + c, m)).sum::<f64>();
                let quad = iproduct!(0..nvir, 0..nocc, 0..nocc)
                    .map(|(d, m, n)| t(b, d, m, n) * v(m, n, o + d, o + c))
                    .sum::<f64>();
                t(a, c, j, i) * (lin + 0.5 * quad)
            })
            .sum::<f64>()
    };
    let r7 = |a, b, i, j| 0.5 * iproduct!(0..nocc, 0..nocc).map(|(m, n)| t(b, a, m, n) * v(m, n, j, i)).sum::<f64>();
    let r8 = |a, b, i, j| iproduct!(0..nocc, 0..nocc).map(|(m, n)| t(b, a, i, m) * v(m, n, j, n)).sum::<f64>();

    let entry = |a: usize, b: usize, i: usize, j: usize| {
        let mut g = 0.0;
        g += r1(a, b, i, j) - r1(b, a, i, j);
        g -= r2(a, b, i, j) - r2(a, b, j, i);
        g -= r3(a, b, i, j) - r3(a, b, j, i);
        g += r4(a, b, i, j);
        g += (r5(a, b, i, j) - r5(a, b, j, i)) - (r5(b, a, i, j) - r5(b, a, j, i));
        g -= r6(a, b, i, j) - r6(b, a, i, j);
        g += r7(a, b, i, j);
        g += r8(a, b, i, j) - r8(a, b, j, i);
        g += v(o + a, o + b, i, j);
        g
    };

    let data: Vec<f64> = (0..nvir * nvir * nocc * nocc)
        .into_par_iter()
        .map(|idx| {
            let j = idx % nocc;
            let i = (idx / nocc) % nocc;
            let b = (idx / (nocc * nocc)) % nvir;
            let a = idx / (nocc * nocc * nvir);
            entry(a, b, i, j)
        })
        .collect();

    rt::asarray((data, vec![nvir, nvir, nocc, nocc].c(), &device))
}

pub fn get_ccd_energy_naive(mol_info: &CCDInfo, t2: &Tsr) -> f64 {
    let nocc = mol_info.nocc();
    let nvir = mol_info.nvir();
    let h = &mol_info.h;
    let u = &mol_info.u;

    let mut e_tot = 0.0;
    for i in 0..nocc {
        e_tot += h[[i, i]];
    }
    for (i, j) in iproduct!(0..nocc, 0..nocc) {
        e_tot += 0.5 * u[[i, j, i, j]];
    }
    for (a, b, i, j) in iproduct!(0..nvir, 0..nvir, 0..nocc, 0..nocc) {
        e_tot += 0.25 * u[[nocc + a, nocc + b, i, j]] * t2[[a, b, i, j]];
    }
    e_tot
}
