use crate::prelude::*;
use std::sync::atomic::Ordering;
use std::time::Instant;

/* #region input validation */

/// Reject unsupported or inconsistent input before any tensor contraction happens.
pub fn check_ccd_input(mol_info: &CCDInfo, cc_config: &CCDConfig) -> CCDResult<()> {
    if !cc_config.diagonal_h {
        return Err(CCDError::UnsupportedConfiguration(
            "only diagonal one-body operators are supported (diagonal_h = false was requested)".to_string(),
        ));
    }

    check_ccd_shapes(mol_info)?;

    let offdiag = util::max_offdiag(&mol_info.h);
    if offdiag > OFFDIAG_TOL {
        return Err(CCDError::UnsupportedConfiguration(format!(
            "h has off-diagonal elements up to {offdiag:.3e}; only diagonal one-body operators are supported"
        )));
    }

    Ok(())
}

/// Shapes of h and u, and the occupied/virtual split.
///
/// Both `nocc == 0` and `nocc == nmo` are refused: without occupied or without virtual orbitals there are no
/// doubles amplitudes to solve for.
pub fn check_ccd_shapes(mol_info: &CCDInfo) -> CCDResult<()> {
    let h_shape = mol_info.h.shape();
    if h_shape.len() != 2 || h_shape[0] != h_shape[1] {
        return Err(CCDError::ShapeMismatch(format!("h must be a square matrix, got shape {h_shape:?}")));
    }
    let nmo = h_shape[0];

    let u_shape = mol_info.u.shape();
    if u_shape.len() != 4 || u_shape.iter().any(|&len| len != nmo) {
        return Err(CCDError::ShapeMismatch(format!(
            "u must have shape [{nmo}, {nmo}, {nmo}, {nmo}] to match h, got {u_shape:?}"
        )));
    }

    let nocc = mol_info.nocc();
    if nocc == 0 || nocc >= nmo {
        return Err(CCDError::ShapeMismatch(format!(
            "number of occupied orbitals must leave at least one occupied and one virtual orbital \
             (1..{nmo} for {nmo} orbitals), got {nocc}"
        )));
    }

    Ok(())
}

/// Shape of a doubles amplitude, `(nvir, nvir, nocc, nocc)`.
pub fn check_ccd_amplitude_shape(mol_info: &CCDInfo, t2: &TsrView) -> CCDResult<()> {
    let (nocc, nvir) = (mol_info.nocc(), mol_info.nvir());
    let expected = vec![nvir, nvir, nocc, nocc];
    if t2.shape() != &expected {
        return Err(CCDError::ShapeMismatch(format!(
            "t2 must have shape {expected:?} for {nocc} occupied and {nvir} virtual orbitals, got {:?}",
            t2.shape()
        )));
    }
    Ok(())
}

/* #endregion */

/* #region denominator and hamiltonian blocks */

/// `d_vvoo[a, b, i, j] = h[i, i] + h[j, j] - h[a, a] - h[b, b]`, virtual indices offset by `nocc`.
pub fn get_ccd_denominator(mol_info: &CCDInfo) -> Tsr {
    let nocc = mol_info.nocc();

    let e_mo = mol_info.h.diagonal(None);
    let eo = e_mo.i(..nocc);
    let ev = e_mo.i(nocc..);

    let d_vvoo: Tsr = eo.i((None, None, .., None)) + eo.i((None, None, None, ..))
        - ev.i((.., None, None, None))
        - ev.i((None, .., None, None));
    d_vvoo
}

/// Apply the singular-denominator policy.
///
/// Under `SingularPolicy::Passthrough`, vanishing entries become one, so that dividing by the result leaves the
/// numerator untouched at those entries.
pub fn get_ccd_safe_denominator(d_vvoo: Tsr, policy: SingularPolicy) -> CCDResult<Tsr> {
    let nvir = d_vvoo.shape()[0];
    let nocc = d_vvoo.shape()[2];

    let singular: Vec<[usize; 4]> = (0..nvir)
        .into_par_iter()
        .flat_map_iter(|a| {
            let d_vvoo = &d_vvoo;
            iproduct!(0..nvir, 0..nocc, 0..nocc)
                .filter(move |&(b, i, j)| d_vvoo[[a, b, i, j]] == 0.0)
                .map(move |(b, i, j)| [a, b, i, j])
        })
        .collect();

    let Some(&first) = singular.iter().min() else {
        return Ok(d_vvoo);
    };

    match policy {
        SingularPolicy::Error => Err(CCDError::SingularDenominator { count: singular.len(), first }),
        SingularPolicy::Passthrough => {
            warn!(
                "Energy denominator vanishes at {} entries (first at {first:?}); amplitudes pass through undivided there.",
                singular.len()
            );
            Ok(d_vvoo.mapv(|x| if x == 0.0 { 1.0 } else { x }))
        },
    }
}

pub fn get_ccd_intermediates_eri(mol_info: &CCDInfo, policy: SingularPolicy) -> CCDResult<CCDIntermediates> {
    check_ccd_shapes(mol_info)?;

    let nmo = mol_info.nmo();
    let nocc = mol_info.nocc();
    let nvir = mol_info.nvir();
    let h = &mol_info.h;
    let u = &mol_info.u;
    let device = h.device().clone();

    let so = slice!(0, nocc);
    let sv = slice!(nocc, nmo);

    let eri_vvoo = u.i((sv, sv, so, so)).into_contig(RowMajor);
    let eri_oovv = u.i((so, so, sv, sv)).into_contig(RowMajor);
    let eri_voov = u.i((sv, so, so, sv)).into_contig(RowMajor);
    let eri_vvvv = u.i((sv, sv, sv, sv)).into_contig(RowMajor);
    let eri_oooo = u.i((so, so, so, so)).into_contig(RowMajor);

    let mut trace_vv: Tsr = rt::zeros(([nvir, nvir], &device));
    for m in 0..nocc {
        trace_vv += u.i((sv, m, sv, m));
    }
    let mut trace_oo: Tsr = rt::zeros(([nocc, nocc], &device));
    for n in 0..nocc {
        trace_oo += u.i((so, n, so, n));
    }

    let mut f_vv: Tsr = h.i((sv, sv)).into_contig(RowMajor);
    f_vv.diagonal_mut(None).fill(0.0);
    let mut f_oo: Tsr = h.i((so, so)).into_contig(RowMajor);
    f_oo.diagonal_mut(None).fill(0.0);

    let d_vvoo = get_ccd_safe_denominator(get_ccd_denominator(mol_info), policy)?;

    Ok(CCDIntermediates {
        eri_vvoo,
        eri_oovv,
        eri_voov,
        eri_vvvv,
        eri_oooo,
        trace_vv,
        trace_oo,
        f_vv,
        f_oo,
        d_vvoo,
    })
}

/* #endregion */

/* #region energy and amplitude initial guess */

/// Total CCD energy: `sum_i h[i, i] + 1/2 sum_ij u[i, j, i, j] + 1/4 sum_abij u[a, b, i, j] t2[a, b, i, j]`.
pub fn get_ccd_energy(mol_info: &CCDInfo, intermediates: &CCDIntermediates, t2: TsrView) -> f64 {
    let nocc = mol_info.nocc();
    let h = &mol_info.h;
    let u = &mol_info.u;

    let e_ref_one = (0..nocc).map(|i| h[[i, i]]).sum::<f64>();
    let e_ref_two = 0.5 * iproduct!(0..nocc, 0..nocc).map(|(i, j)| u[[i, j, i, j]]).sum::<f64>();
    let e_corr = 0.25 * (intermediates.eri_vvoo.reshape(-1) % t2.reshape(-1)).to_scalar();
    e_ref_one + e_ref_two + e_corr
}

/// Second-order amplitudes `t2 = u[v, v, o, o] / d_vvoo`.
pub fn get_ccd_initial_guess(mol_info: &CCDInfo, intermediates: &CCDIntermediates) -> CCDResults {
    let t2 = &intermediates.eri_vvoo / &intermediates.d_vvoo;
    let e_tot = get_ccd_energy(mol_info, intermediates, t2.view());
    CCDResults { e_tot, t2, niter: 0 }
}

/* #endregion */

/* #region intermediates and residual */

pub fn get_ccd_intermediates_chi(intermediates: &CCDIntermediates, t2: TsrView) -> CCDResult<CCDChi> {
    let eri_oovv = intermediates.eri_oovv.view();

    // chi_bmjc = u[v, o, o, v] - 1/2 "bdjN, mNdc -> bmjc"
    let chi_bmjc = &intermediates.eri_voov - 0.5 * contract("bdjN, mNdc -> bmjc", t2.view(), eri_oovv.view())?;

    // chi_bc = trace_vv + 1/2 "bdmN, mNdc -> bc"
    let chi_bc = &intermediates.trace_vv + 0.5 * contract("bdmN, mNdc -> bc", t2.view(), eri_oovv.view())?;

    // chi_nj = 1/2 "dcjm, mNdc -> Nj"
    let chi_nj = 0.5 * contract("dcjm, mNdc -> Nj", t2.view(), eri_oovv.view())?;

    // chi_badc = 1/2 u[v, v, v, v] + 1/4 "bamN, mNdc -> badc"
    let chi_badc =
        0.5 * &intermediates.eri_vvvv + 0.25 * contract("bamN, mNdc -> badc", t2.view(), eri_oovv.view())?;

    Ok(CCDChi { chi_bmjc, chi_bc, chi_nj, chi_badc })
}

/// Off-diagonal one-body terms. Both blocks are zero for a diagonal h, in which case nothing is added.
pub fn get_ccd_rhs2_one_body(mut rhs2: TsrMut, intermediates: &CCDIntermediates, t2: TsrView) -> CCDResult<()> {
    let f_vv = &intermediates.f_vv;
    let f_oo = &intermediates.f_oo;

    // + P(ab) "ac, bcji -> abij"
    if f_vv.l2_norm() > 0.0 {
        let scr = contract("ac, bcji -> abij", f_vv.view(), t2.view())?;
        rhs2 += util::antisym_ab(&scr);
    }

    // - P(ij) "ki, bajk -> abij"
    if f_oo.l2_norm() > 0.0 {
        let scr = contract("ki, bajk -> abij", f_oo.view(), t2.view())?;
        rhs2 -= util::antisym_ij(&scr);
    }

    Ok(())
}

pub fn get_ccd_rhs2_lt2_contract(
    mut rhs2: TsrMut,
    intermediates: &CCDIntermediates,
    chi: &CCDChi,
    t2: TsrView,
) -> CCDResult<()> {
    // + P(ij) "baim, mj -> abij" with u[m, N, j, N]
    // - P(ij) "baim, mj -> abij" with chi_nj
    let scr_mj = &intermediates.trace_oo - &chi.chi_nj;
    let scr = contract("baim, mj -> abij", t2.view(), scr_mj.view())?;
    rhs2 += util::antisym_ij(&scr);

    // - P(ab) "acji, bc -> abij"
    let scr = contract("acji, bc -> abij", t2.view(), chi.chi_bc.view())?;
    rhs2 -= util::antisym_ab(&scr);

    Ok(())
}

pub fn get_ccd_rhs2_ladder(
    mut rhs2: TsrMut,
    intermediates: &CCDIntermediates,
    chi: &CCDChi,
    t2: TsrView,
) -> CCDResult<()> {
    // + "dcji, badc -> abij"
    rhs2 += contract("dcji, badc -> abij", t2.view(), chi.chi_badc.view())?;

    // + 1/2 "bamN, mNji -> abij"
    rhs2 += 0.5 * contract("bamN, mNji -> abij", t2.view(), intermediates.eri_oooo.view())?;

    Ok(())
}

pub fn get_ccd_rhs2_ring(mut rhs2: TsrMut, chi: &CCDChi, t2: TsrView) -> CCDResult<()> {
    // + P(ab) P(ij) "acim, bmjc -> abij"
    // P(ij) first, then P(ab) on the result
    let scr = contract("acim, bmjc -> abij", t2.view(), chi.chi_bmjc.view())?;
    let scr = util::antisym_ij(&scr);
    rhs2 += util::antisym_ab(&scr);

    Ok(())
}

/// Right-hand side `g(t2)` of the amplitude equation `t2 = g(t2) / d_vvoo`.
pub fn get_ccd_rhs2(intermediates: &CCDIntermediates, chi: &CCDChi, t2: TsrView) -> CCDResult<Tsr> {
    // + u[a, b, i, j]
    let mut rhs2 = intermediates.eri_vvoo.to_owned();

    get_ccd_rhs2_one_body(rhs2.view_mut(), intermediates, t2.view())?;
    get_ccd_rhs2_lt2_contract(rhs2.view_mut(), intermediates, chi, t2.view())?;
    get_ccd_rhs2_ladder(rhs2.view_mut(), intermediates, chi, t2.view())?;
    get_ccd_rhs2_ring(rhs2.view_mut(), chi, t2.view())?;

    Ok(rhs2)
}

/// `g(t2)` from scratch, as a pure function of `(h, u, t2, nocc)`.
///
/// Off-diagonal one-body elements are accepted here and enter through the masked one-body terms.
pub fn get_ccd_residual(mol_info: &CCDInfo, t2: TsrView) -> CCDResult<Tsr> {
    check_ccd_shapes(mol_info)?;
    check_ccd_amplitude_shape(mol_info, &t2)?;

    let intermediates = get_ccd_intermediates_eri(mol_info, SingularPolicy::Passthrough)?;
    let chi = get_ccd_intermediates_chi(&intermediates, t2.view())?;
    get_ccd_rhs2(&intermediates, &chi, t2)
}

pub fn get_amplitude_from_rhs(intermediates: &CCDIntermediates, rhs2: Tsr) -> Tsr {
    rhs2 / &intermediates.d_vvoo
}

/* #endregion */

/* #region iteration driver */

pub fn update_ccd_amplitude(
    mol_info: &CCDInfo,
    intermediates: &CCDIntermediates,
    cc_info: &CCDResults,
    diis_obj: Option<&mut DIISIncore>,
) -> CCDResult<CCDResults> {
    let timer_outer = Instant::now();

    let t2 = cc_info.t2.view();

    let timer = Instant::now();
    let chi = get_ccd_intermediates_chi(intermediates, t2.view())?;
    debug!("Time elapsed (intermediates): {:?}", timer.elapsed());

    let timer = Instant::now();
    let rhs2 = get_ccd_rhs2(intermediates, &chi, t2.view())?;
    debug!("Time elapsed (rhs2): {:?}", timer.elapsed());

    let t2_new = get_amplitude_from_rhs(intermediates, rhs2);

    let t2_new = match diis_obj {
        Some(diis_obj) => {
            let timer = Instant::now();
            let err = &t2_new - &cc_info.t2;
            let t2_new = diis_obj.update(t2_new, err);
            debug!("Time elapsed (diis update): {:?}", timer.elapsed());
            t2_new
        },
        None => t2_new,
    };

    let e_tot = get_ccd_energy(mol_info, intermediates, t2_new.view());

    debug!("Time elapsed (ccd amplitude): {:?}", timer_outer.elapsed());

    Ok(CCDResults { e_tot, t2: t2_new, niter: cc_info.niter + 1 })
}

/// Solve the CCD amplitude equations by fixed-point iteration.
///
/// Returns the converged amplitudes and energy along with the cached Hamiltonian blocks. Convergence is declared
/// when the energy changes by no more than `cc_config.conv_tol_e` between two consecutive iterations; at least one
/// amplitude update is always performed.
pub fn ccd_iteration(mol_info: &CCDInfo, cc_config: &CCDConfig) -> CCDResult<(CCDResults, CCDIntermediates)> {
    let time_outer = Instant::now();

    check_ccd_input(mol_info, cc_config)?;
    info!("CCD with {} occupied and {} virtual orbitals", mol_info.nocc(), mol_info.nvir());

    let timer = Instant::now();
    let intermediates = get_ccd_intermediates_eri(mol_info, cc_config.singular_policy)?;
    debug!("Time elapsed (hamiltonian blocks): {:?}", timer.elapsed());

    let mut ccd_results = get_ccd_initial_guess(mol_info, &intermediates);
    info!("Initial energy (MP2 amplitudes): {:?}", ccd_results.e_tot);

    let mut diis_obj = cc_config.diis.clone().map(DIISIncore::new);

    let mut diff_eng = f64::INFINITY;
    for niter in 0..cc_config.max_cycle {
        if let Some(cancel) = &cc_config.cancel {
            if cancel.load(Ordering::Relaxed) {
                warn!("CCD cancelled before iteration {niter}.");
                return Err(CCDError::Cancelled { niter, last: Box::new(ccd_results) });
            }
        }
        if let Some(budget) = cc_config.max_time {
            if time_outer.elapsed() > budget {
                warn!("CCD exceeded time budget {budget:.2?} before iteration {niter}.");
                return Err(CCDError::TimeBudgetExceeded { budget, niter, last: Box::new(ccd_results) });
            }
        }

        let timer = Instant::now();
        let ccd_results_new = update_ccd_amplitude(mol_info, &intermediates, &ccd_results, diis_obj.as_mut())?;

        diff_eng = ccd_results_new.e_tot - ccd_results.e_tot;
        let norm_t2 = (&ccd_results_new.t2 - &ccd_results.t2).l2_norm();
        info!("Iteration: {niter}");
        info!("    Energy: {:?}", ccd_results_new.e_tot);
        info!("    Energy diff: {:?}", diff_eng);
        info!("    T2 norm: {:?}", norm_t2);
        debug!("Time elapsed (ccd iteration): {:?}", timer.elapsed());

        if diff_eng.abs() <= cc_config.conv_tol_e {
            info!("CCD converged in {} iterations.", ccd_results_new.niter);
            info!("Time elapsed (CCD total time): {:?}", time_outer.elapsed());
            return Ok((ccd_results_new, intermediates));
        }
        ccd_results = ccd_results_new;
    }

    Err(CCDError::ConvergenceFailure { max_cycle: cc_config.max_cycle, diff_eng, last: Box::new(ccd_results) })
}

/// CCD energy of `(h, u)` with `nocc` occupied orbitals, using default settings otherwise.
///
/// # Usage
///
/// ```norun
/// let e_ccd = solve_ccd(h, u, 2, 1.0e-4, true)?;
/// ```
pub fn solve_ccd(h: Tsr, u: Tsr, nocc: usize, conv_tol_e: f64, diagonal_h: bool) -> CCDResult<f64> {
    let mol_info = CCDInfo { h, u, nocc };
    let cc_config = CCDConfig { conv_tol_e, diagonal_h, ..Default::default() };
    let (ccd_results, _) = ccd_iteration(&mol_info, &cc_config)?;
    Ok(ccd_results.e_tot)
}

/* #endregion */

#[cfg(test)]
mod test {
    use super::*;
    use crate::ccd_naive::{get_ccd_energy_naive, get_ccd_residual_naive};
    use rand::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    /// Diagonal h from `levels`, and `u` antisymmetrized from smooth deterministic values.
    fn toy_system(levels: &[f64], scale: f64, nocc: usize) -> CCDInfo {
        let nmo = levels.len();
        let device = DeviceTsr::default();

        let mut h: Tsr = rt::zeros(([nmo, nmo], &device));
        for p in 0..nmo {
            h[[p, p]] = levels[p];
        }

        let raw = |p: usize, q: usize, r: usize, s: usize| {
            scale * (1.0 + p as f64 + 2.0 * q as f64 + 3.0 * r as f64 + 4.0 * s as f64).sin()
        };
        let mut u: Tsr = rt::zeros(([nmo, nmo, nmo, nmo], &device));
        for (p, q, r, s) in iproduct!(0..nmo, 0..nmo, 0..nmo, 0..nmo) {
            u[[p, q, r, s]] = raw(p, q, r, s) - raw(q, p, r, s) - raw(p, q, s, r) + raw(q, p, s, r);
        }
        CCDInfo { h, u, nocc }
    }

    fn random_antisym(shape: [usize; 4], rng: &mut StdRng) -> Tsr {
        let device = DeviceTsr::default();
        let size: usize = shape.iter().product();
        let data: Vec<f64> = (0..size).map(|_| rng.gen_range(-0.5..0.5)).collect();
        let raw: Tsr = rt::asarray((data, shape.to_vec().c(), &device));
        util::antisym_ab(&util::antisym_ij(&raw))
    }

    /// Random symmetric h, optionally with couplings inside the occupied and virtual blocks, and random
    /// antisymmetric u.
    fn random_system(nmo: usize, nocc: usize, offdiag: bool, rng: &mut StdRng) -> CCDInfo {
        let device = DeviceTsr::default();
        let mut h: Tsr = rt::zeros(([nmo, nmo], &device));
        for p in 0..nmo {
            let shift = if p < nocc { -2.0 } else { 1.0 };
            h[[p, p]] = shift + 0.1 * p as f64 + rng.gen_range(0.0..0.05);
        }
        if offdiag {
            for (p, q) in iproduct!(0..nmo, 0..nmo) {
                if p < q && ((p < nocc) == (q < nocc)) {
                    let val = rng.gen_range(-0.1..0.1);
                    h[[p, q]] = val;
                    h[[q, p]] = val;
                }
            }
        }
        let u = random_antisym([nmo, nmo, nmo, nmo], rng);
        CCDInfo { h, u, nocc }
    }

    fn assert_antisymmetric(t2: &Tsr) {
        assert!((t2 + t2.swapaxes(0, 1)).l2_norm() < 1e-12);
        assert!((t2 + t2.swapaxes(2, 3)).l2_norm() < 1e-12);
    }

    #[test]
    fn test_denominator_and_initial_guess() {
        let mol_info = toy_system(&[-1.0, -0.8, 0.5, 0.7], 0.05, 2);
        let intermediates = get_ccd_intermediates_eri(&mol_info, SingularPolicy::Error).unwrap();
        let d_vvoo = &intermediates.d_vvoo;
        assert_eq!(d_vvoo.shape(), &vec![2, 2, 2, 2]);
        assert!((d_vvoo[[0, 1, 0, 1]] - (-1.0 - 0.8 - 0.5 - 0.7)).abs() < 1e-14);
        assert!((d_vvoo[[1, 1, 0, 0]] - (-2.0 - 1.4)).abs() < 1e-14);

        let ccd_results = get_ccd_initial_guess(&mol_info, &intermediates);
        for (a, b, i, j) in iproduct!(0..2, 0..2, 0..2, 0..2) {
            let val = mol_info.u[[2 + a, 2 + b, i, j]] / d_vvoo[[a, b, i, j]];
            assert!((ccd_results.t2[[a, b, i, j]] - val).abs() < 1e-14);
        }
        assert_antisymmetric(&ccd_results.t2);
        assert_eq!(ccd_results.niter, 0);
        assert!((ccd_results.e_tot - -1.7873581400215437).abs() < 1e-12);
    }

    #[test]
    fn test_residual_at_zero_amplitude() {
        // g(0) / D reproduces the initial guess
        let mol_info = toy_system(&[-1.2, -1.0, 0.4, 0.6, 0.9, 1.3], 0.05, 2);
        let intermediates = get_ccd_intermediates_eri(&mol_info, SingularPolicy::Error).unwrap();
        let t2_zero = intermediates.eri_vvoo.zeros_like();
        let rhs2 = get_ccd_residual(&mol_info, t2_zero.view()).unwrap();
        let t2 = get_amplitude_from_rhs(&intermediates, rhs2);
        let t2_init = get_ccd_initial_guess(&mol_info, &intermediates).t2;
        assert!((t2 - t2_init).l2_norm() < 1e-14);
    }

    #[test]
    fn test_residual_against_naive() {
        let mut rng = StdRng::seed_from_u64(42);
        let (nmo, nocc) = (6, 2);
        let nvir = nmo - nocc;
        for offdiag in [false, true] {
            let mol_info = random_system(nmo, nocc, offdiag, &mut rng);
            let t2 = random_antisym([nvir, nvir, nocc, nocc], &mut rng);

            let rhs2 = get_ccd_residual(&mol_info, t2.view()).unwrap();
            let rhs2_naive = get_ccd_residual_naive(&mol_info, &t2);
            assert!((&rhs2 - &rhs2_naive).l2_norm() < 1e-10 * rhs2_naive.l2_norm().max(1.0));
            assert_antisymmetric(&rhs2);
        }
    }

    #[test]
    fn test_energy_against_naive() {
        let mut rng = StdRng::seed_from_u64(3);
        let mol_info = random_system(5, 3, false, &mut rng);
        let intermediates = get_ccd_intermediates_eri(&mol_info, SingularPolicy::Error).unwrap();
        let t2 = random_antisym([2, 2, 3, 3], &mut rng);
        let e_tot = get_ccd_energy(&mol_info, &intermediates, t2.view());
        let e_tot_naive = get_ccd_energy_naive(&mol_info, &t2);
        assert!((e_tot - e_tot_naive).abs() < 1e-12);
    }

    #[test]
    fn test_antisymmetry_preserved_in_iterations() {
        let mol_info = toy_system(&[-1.1, -0.9, -0.7, 0.6, 0.8], 0.04, 3);
        let intermediates = get_ccd_intermediates_eri(&mol_info, SingularPolicy::Error).unwrap();
        let mut ccd_results = get_ccd_initial_guess(&mol_info, &intermediates);
        for niter in 1..=5 {
            ccd_results = update_ccd_amplitude(&mol_info, &intermediates, &ccd_results, None).unwrap();
            assert_eq!(ccd_results.niter, niter);
            assert_antisymmetric(&ccd_results.t2);
        }
    }

    #[test]
    fn test_toy_regression() {
        let mol_info = toy_system(&[-1.0, -0.8, 0.5, 0.7], 0.05, 2);
        let cc_config = CCDConfig { conv_tol_e: 1.0e-10, ..Default::default() };
        let (ccd_results, _) = ccd_iteration(&mol_info, &cc_config).unwrap();
        assert!((ccd_results.e_tot - -1.7873614551369394).abs() < 1e-11);
        assert_eq!(ccd_results.niter, 4);

        // default tolerance stops after the first update
        let cc_config = CCDConfig::default();
        let (ccd_results, _) = ccd_iteration(&mol_info, &cc_config).unwrap();
        assert!((ccd_results.e_tot - -1.7873614014377466).abs() < 1e-11);
        assert_eq!(ccd_results.niter, 1);

        let cc_config = CCDConfig { conv_tol_e: 1.0e-10, ..Default::default() };
        let mol_info = toy_system(&[-1.2, -1.0, 0.4, 0.6, 0.9, 1.3], 0.05, 2);
        let (ccd_results, _) = ccd_iteration(&mol_info, &cc_config).unwrap();
        assert!((ccd_results.e_tot - -2.190761734682843).abs() < 1e-9);
        assert!(ccd_results.niter < 100);

        let mol_info = toy_system(&[-1.1, -0.9, -0.7, 0.6, 0.8], 0.04, 3);
        let (ccd_results, _) = ccd_iteration(&mol_info, &cc_config).unwrap();
        assert!((ccd_results.e_tot - -2.5661818403272356).abs() < 1e-11);
        assert_eq!(ccd_results.niter, 6);
    }

    #[test]
    fn test_pairing_regression() {
        let mol_info = pairing::pairing_model(4, 2, 1.0, 0.5);
        let (h, u, nocc) = (mol_info.h.to_owned(), mol_info.u.to_owned(), mol_info.nocc);
        let e_tot = solve_ccd(h, u, nocc, 1.0e-10, true).unwrap();
        assert!((e_tot - 1.4166376647216727).abs() < 1e-9);

        let (ccd_results, _) = ccd_iteration(&mol_info, &CCDConfig::default()).unwrap();
        assert!((ccd_results.e_tot - 1.4166392678053268).abs() < 1e-10);
        assert_eq!(ccd_results.niter, 4);

        // attractive and stronger couplings
        let cc_config = CCDConfig { conv_tol_e: 1.0e-10, ..Default::default() };
        let mol_info = pairing::pairing_model(4, 2, 1.0, -0.5);
        let (ccd_results, _) = ccd_iteration(&mol_info, &cc_config).unwrap();
        assert!((ccd_results.e_tot - 2.436943777241609).abs() < 1e-9);
        let mol_info = pairing::pairing_model(4, 2, 1.0, 1.0);
        let (ccd_results, _) = ccd_iteration(&mol_info, &cc_config).unwrap();
        assert!((ccd_results.e_tot - 0.6304427536413595).abs() < 1e-9);
        assert!(ccd_results.niter < 100);
    }

    #[test]
    fn test_diis_same_energy() {
        let mol_info = pairing::pairing_model(4, 2, 1.0, 1.0);
        let diis = Some(DIISIncoreFlags::default());
        let cc_config = CCDConfig { conv_tol_e: 1.0e-10, diis, ..Default::default() };
        let (ccd_results, _) = ccd_iteration(&mol_info, &cc_config).unwrap();
        assert!((ccd_results.e_tot - 0.6304427536413595).abs() < 1e-8);
        assert!(ccd_results.niter < 100);
        assert_antisymmetric(&ccd_results.t2);
    }

    #[test]
    fn test_unsupported_configuration() {
        let mol_info = toy_system(&[-1.0, -0.8, 0.5, 0.7], 0.05, 2);
        let cc_config = CCDConfig { diagonal_h: false, ..Default::default() };
        assert!(matches!(ccd_iteration(&mol_info, &cc_config), Err(CCDError::UnsupportedConfiguration(_))));

        let mut mol_info = mol_info;
        mol_info.h[[0, 1]] = 0.01;
        mol_info.h[[1, 0]] = 0.01;
        let result = ccd_iteration(&mol_info, &CCDConfig::default());
        assert!(matches!(result, Err(CCDError::UnsupportedConfiguration(_))));

        let (h, u) = (mol_info.h.to_owned(), mol_info.u.to_owned());
        assert!(matches!(solve_ccd(h, u, 2, 1.0e-6, true), Err(CCDError::UnsupportedConfiguration(_))));

        // the flag alone is refused, even for a diagonal h
        let mol_info = toy_system(&[-1.0, -0.8, 0.5, 0.7], 0.05, 2);
        let (h, u) = (mol_info.h.to_owned(), mol_info.u.to_owned());
        assert!(matches!(solve_ccd(h, u, 2, 1.0e-6, false), Err(CCDError::UnsupportedConfiguration(_))));
    }

    #[test]
    fn test_shape_mismatch() {
        let mol_info = toy_system(&[-1.0, -0.8, 0.5, 0.7], 0.05, 2);
        for nocc in [0, 4, 5] {
            let (h, u) = (mol_info.h.to_owned(), mol_info.u.to_owned());
            assert!(matches!(solve_ccd(h, u, nocc, 1.0e-6, true), Err(CCDError::ShapeMismatch(_))));
        }

        // no virtual orbitals is refused with a message saying so
        let (h, u) = (mol_info.h.to_owned(), mol_info.u.to_owned());
        let err = solve_ccd(h, u, 4, 1.0e-6, true).unwrap_err();
        assert!(err.to_string().contains("one virtual orbital"));

        let other = toy_system(&[-1.0, -0.8, 0.5], 0.05, 2);
        let mol_info = CCDInfo { h: mol_info.h, u: other.u, nocc: 2 };
        assert!(matches!(ccd_iteration(&mol_info, &CCDConfig::default()), Err(CCDError::ShapeMismatch(_))));
    }

    #[test]
    fn test_residual_shape_mismatch() {
        let device = DeviceTsr::default();

        // more occupied orbitals than orbitals
        let mut mol_info = pairing::pairing_model(2, 1, 1.0, 0.5);
        mol_info.nocc = 5;
        let t2: Tsr = rt::zeros(([1, 1, 1, 1], &device));
        assert!(matches!(get_ccd_residual(&mol_info, t2.view()), Err(CCDError::ShapeMismatch(_))));
        let result = get_ccd_intermediates_eri(&mol_info, SingularPolicy::Error);
        assert!(matches!(result, Err(CCDError::ShapeMismatch(_))));

        // amplitude of the wrong shape for 2 occupied and 2 virtual orbitals
        mol_info.nocc = 2;
        let t2: Tsr = rt::zeros(([2, 2, 1, 1], &device));
        assert!(matches!(get_ccd_residual(&mol_info, t2.view()), Err(CCDError::ShapeMismatch(_))));
        let t2: Tsr = rt::zeros(([2, 2, 2, 2], &device));
        assert!(get_ccd_residual(&mol_info, t2.view()).is_ok());
    }

    #[test]
    fn test_singular_denominator() {
        // occupied level 0.0 and virtual level 0.0 make D[0, 0, 1, 1] vanish
        let mol_info = toy_system(&[-1.0, 0.0, 0.0, 1.0], 0.05, 2);
        match ccd_iteration(&mol_info, &CCDConfig::default()) {
            Err(CCDError::SingularDenominator { count, first }) => {
                assert_eq!(count, 1);
                assert_eq!(first, [0, 0, 1, 1]);
            },
            other => panic!("expected singular denominator, got {other:?}"),
        }

        let intermediates = get_ccd_intermediates_eri(&mol_info, SingularPolicy::Passthrough).unwrap();
        let d_vvoo = &intermediates.d_vvoo;
        assert_eq!(d_vvoo[[0, 0, 1, 1]], 1.0);
        assert!((d_vvoo[[0, 1, 0, 1]] - (-1.0 + 0.0 - 0.0 - 1.0)).abs() < 1e-14);

        // the numerator passes through undivided at the singular entry
        let device = DeviceTsr::default();
        let mut rng = StdRng::seed_from_u64(5);
        let data: Vec<f64> = (0..16).map(|_| rng.gen_range(0.5..1.0)).collect();
        let rhs2: Tsr = rt::asarray((data, vec![2, 2, 2, 2].c(), &device));
        let t2 = get_amplitude_from_rhs(&intermediates, rhs2.to_owned());
        assert_eq!(t2[[0, 0, 1, 1]], rhs2[[0, 0, 1, 1]]);
        assert!((t2[[0, 1, 0, 1]] - rhs2[[0, 1, 0, 1]] / -2.0).abs() < 1e-14);
    }

    #[test]
    fn test_convergence_failure_keeps_last() {
        let mol_info = pairing::pairing_model(4, 2, 1.0, 0.5);
        let cc_config = CCDConfig { conv_tol_e: 1.0e-10, max_cycle: 2, ..Default::default() };
        let err = ccd_iteration(&mol_info, &cc_config).unwrap_err();
        assert!(matches!(err, CCDError::ConvergenceFailure { max_cycle: 2, .. }));
        let last = err.last_results().unwrap();
        assert_eq!(last.niter, 2);
        assert!((last.e_tot - 1.416768675392377).abs() < 1e-11);
    }

    #[test]
    fn test_cancel_and_time_budget() {
        let mol_info = pairing::pairing_model(4, 2, 1.0, 0.5);

        let cancel = Arc::new(AtomicBool::new(true));
        let cc_config = CCDConfig { cancel: Some(cancel), ..Default::default() };
        let err = ccd_iteration(&mol_info, &cc_config).unwrap_err();
        assert!(matches!(err, CCDError::Cancelled { niter: 0, .. }));
        assert!((err.last_results().unwrap().e_tot - 1.4270833333333333).abs() < 1e-12);

        let cc_config = CCDConfig { max_time: Some(std::time::Duration::ZERO), ..Default::default() };
        let err = ccd_iteration(&mol_info, &cc_config).unwrap_err();
        assert!(matches!(err, CCDError::TimeBudgetExceeded { niter: 0, .. }));
    }
}
