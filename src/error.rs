use crate::structs::CCDResults;
use std::time::Duration;
use thiserror::Error;

pub type CCDResult<T> = Result<T, CCDError>;

#[derive(Debug, Error)]
pub enum CCDError {
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// `first` is the `[a, b, i, j]` index of the first vanishing entry of D.
    #[error("energy denominator vanishes at {count} entries (first at [a, b, i, j] = {first:?})")]
    SingularDenominator { count: usize, first: [usize; 4] },

    #[error("CCD did not converge in {max_cycle} iterations (last energy difference {diff_eng:.3e})")]
    ConvergenceFailure { max_cycle: usize, diff_eng: f64, last: Box<CCDResults> },

    #[error("CCD iteration cancelled after {niter} iterations")]
    Cancelled { niter: usize, last: Box<CCDResults> },

    #[error("CCD iteration exceeded time budget {budget:.2?} after {niter} iterations")]
    TimeBudgetExceeded { budget: Duration, niter: usize, last: Box<CCDResults> },

    #[error("invalid contraction: {0}")]
    Contraction(String),

    #[error("failed to read {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("invalid npy data in {path}: {reason}")]
    Npy { path: String, reason: String },
}

impl CCDError {
    /// Last amplitudes and energy before the driver gave up, if the failure happened mid-iteration.
    pub fn last_results(&self) -> Option<&CCDResults> {
        match self {
            CCDError::ConvergenceFailure { last, .. }
            | CCDError::Cancelled { last, .. }
            | CCDError::TimeBudgetExceeded { last, .. } => Some(last),
            _ => None,
        }
    }
}
