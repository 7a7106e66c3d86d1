#![allow(unused)]

/* #region for API callers */

pub use crate::ccd::{ccd_iteration, solve_ccd};
pub use crate::contract::{Contraction, contract};
pub use crate::diis::DIISIncore;
pub use crate::error::{CCDError, CCDResult};
pub use crate::structs::{
    CCDChi, CCDConfig, CCDInfo, CCDIntermediates, CCDResults, DIISIncoreFlags, DIISPopStrategy, OFFDIAG_TOL,
    SingularPolicy,
};

/* #endregion */

/* #region for developers */

// RSTSR backend specification
#[cfg(not(feature = "use_openblas"))]
pub type DeviceTsr = DeviceFaer;
#[cfg(feature = "use_openblas")]
pub type DeviceTsr = DeviceOpenBLAS;

pub(crate) use itertools::iproduct;
pub(crate) use rayon::prelude::*;
pub(crate) use rstsr::prelude::*;
pub(crate) use tracing::{debug, info, warn};

pub(crate) use crate::*;

pub type Tsr<D = IxD> = Tensor<f64, DeviceTsr, D>;
pub type TsrView<'a, D = IxD> = TensorView<'a, f64, DeviceTsr, D>;
pub type TsrMut<'a, D = IxD> = TensorMut<'a, f64, DeviceTsr, D>;

/* #endregion */
