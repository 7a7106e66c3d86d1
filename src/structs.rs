use crate::prelude::*;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/* #region CCD */

/// Off-diagonal elements of h above this magnitude mark the one-body operator as non-diagonal.
pub const OFFDIAG_TOL: f64 = 1.0e-12;

/// Input of one CCD solve.
///
/// - `h`: one-body matrix elements, shape `(nmo, nmo)`, diagonal;
/// - `u`: antisymmetrized two-body matrix elements, shape `(nmo, nmo, nmo, nmo)`;
/// - `nocc`: number of occupied orbitals, which come first in the orbital ordering.
///
/// Antisymmetry of `u` is a precondition of the caller and is not validated by the solver.
#[derive(Debug)]
pub struct CCDInfo {
    pub h: Tsr,
    pub u: Tsr,
    pub nocc: usize,
}

/// What to do with entries of the energy denominator that are exactly zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SingularPolicy {
    /// Refuse to solve and report `CCDError::SingularDenominator`.
    #[default]
    Error,

    /// Skip the division at vanishing entries, so the numerator passes through unchanged.
    ///
    /// This accommodates exactly degenerate occupied/virtual orbital pairs.
    Passthrough,
}

/// Blocks of the Hamiltonian cached once per solve.
///
/// Index convention of every block follows its name, e.g. `eri_voov[b, m, j, c] = u[nocc + b, m, j, nocc + c]`.
#[derive(Debug)]
pub struct CCDIntermediates {
    pub eri_vvoo: Tsr,
    pub eri_oovv: Tsr,
    pub eri_voov: Tsr,
    pub eri_vvvv: Tsr,
    pub eri_oooo: Tsr,
    /// `trace_vv[b, c] = sum_m u[nocc + b, m, nocc + c, m]`
    pub trace_vv: Tsr,
    /// `trace_oo[m, j] = sum_n u[m, n, j, n]`
    pub trace_oo: Tsr,
    /// virtual block of h with its diagonal zeroed
    pub f_vv: Tsr,
    /// occupied block of h with its diagonal zeroed
    pub f_oo: Tsr,
    /// energy denominator, zero entries already replaced by one under `SingularPolicy::Passthrough`
    pub d_vvoo: Tsr,
}

/// Intermediates rebuilt from the current amplitude in every iteration.
#[derive(Debug)]
pub struct CCDChi {
    /// `chi_bmjc[b, m, j, c]`, shape `(nvir, nocc, nocc, nvir)`
    pub chi_bmjc: Tsr,
    /// `chi_bc[b, c]`, shape `(nvir, nvir)`
    pub chi_bc: Tsr,
    /// `chi_nj[n, j]`, shape `(nocc, nocc)`
    pub chi_nj: Tsr,
    /// `chi_badc[b, a, d, c]`, shape `(nvir, nvir, nvir, nvir)`
    pub chi_badc: Tsr,
}

#[derive(Debug)]
pub struct CCDResults {
    /// total energy estimate, reference part included
    pub e_tot: f64,
    /// doubles amplitude `t2[a, b, i, j]`
    pub t2: Tsr,
    /// number of amplitude updates performed
    pub niter: usize,
}

#[derive(Debug, Clone)]
pub struct CCDConfig {
    pub max_cycle: usize,
    pub conv_tol_e: f64,
    /// Only `true` is supported.
    pub diagonal_h: bool,
    pub singular_policy: SingularPolicy,
    pub diis: Option<DIISIncoreFlags>,
    pub max_time: Option<Duration>,
    /// Checked at the top of each iteration; set it from another thread to stop the solve.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for CCDConfig {
    fn default() -> Self {
        Self {
            max_cycle: 100,
            conv_tol_e: 1.0e-4,
            diagonal_h: true,
            singular_policy: SingularPolicy::Error,
            diis: None,
            max_time: None,
            cancel: None,
        }
    }
}

impl CCDInfo {
    pub fn nmo(&self) -> usize {
        self.h.shape()[0]
    }

    pub fn nocc(&self) -> usize {
        self.nocc
    }

    pub fn nvir(&self) -> usize {
        self.nmo() - self.nocc()
    }
}

/* #endregion */

/* #region DIIS */

/// DIIS pop strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DIISPopStrategy {
    /// Pop the vector with the smallest iteration number.
    Iteration,

    /// Pop the vector with the largest error norm.
    ErrDiagonal,
}

#[derive(Debug, Clone)]
pub struct DIISIncoreFlags {
    /// Maximum number of vectors in the DIIS space. Default is 6.
    pub space: usize,

    /// Minimum number of vectors in the DIIS space for extrapolation. Default is 2.
    pub min_space: usize,

    /// DIIS pop strategy. Default is `DIISPopStrategy::Iteration`.
    pub pop_strategy: DIISPopStrategy,
}

impl Default for DIISIncoreFlags {
    fn default() -> Self {
        Self { space: 6, min_space: 2, pop_strategy: DIISPopStrategy::Iteration }
    }
}

/* #endregion */
