use crate::prelude::*;

/// Read a real `.npy` array into a tensor.
///
/// Both C- and Fortran-ordered files are accepted; the tensor keeps the logical shape stored in the header.
///
/// # Usage
///
/// ```norun
/// let h = tensor_from_npy("h.npy")?;
/// ```
pub fn tensor_from_npy(fname: &str) -> CCDResult<Tsr> {
    let device = DeviceTsr::default();
    let npy_err = |reason: String| CCDError::Npy { path: fname.to_string(), reason };

    let bytes = std::fs::read(fname).map_err(|source| CCDError::Io { path: fname.to_string(), source })?;
    let npy = npyz::NpyFile::new(&bytes[..]).map_err(|e| npy_err(e.to_string()))?;
    let shape = npy.shape().iter().map(|&x| x as usize).collect::<Vec<usize>>();
    let order = npy.order();
    let data: Vec<f64> = npy.into_vec().map_err(|e| npy_err(e.to_string()))?;
    if data.len() != shape.iter().product::<usize>() {
        return Err(npy_err(format!("{} elements do not fill shape {shape:?}", data.len())));
    }

    let tsr = match order {
        npyz::Order::C => rt::asarray((data, shape.c(), &device)),
        npyz::Order::Fortran => rt::asarray((data, shape.f(), &device)),
    };
    Ok(tsr)
}

/// `P(ab)` on a `[a, b, i, j]` tensor: `t[a, b, i, j] - t[b, a, i, j]`.
pub fn antisym_ab(t: &Tsr) -> Tsr {
    t - t.swapaxes(0, 1)
}

/// `P(ij)` on a `[a, b, i, j]` tensor: `t[a, b, i, j] - t[a, b, j, i]`.
pub fn antisym_ij(t: &Tsr) -> Tsr {
    t - t.swapaxes(2, 3)
}

/// Violation of `u[p, q, r, s] = -u[q, p, r, s] = -u[p, q, s, r]`, as the larger Frobenius norm of the two
/// symmetric parts.
///
/// The solver takes antisymmetry of `u` as given; this is for callers validating loaded data.
pub fn check_antisymmetry(u: &Tsr) -> f64 {
    let err_upper = (u + u.swapaxes(0, 1)).l2_norm();
    let err_lower = (u + u.swapaxes(2, 3)).l2_norm();
    err_upper.max(err_lower)
}

/// Largest magnitude of an off-diagonal element of a square matrix.
pub fn max_offdiag(h: &Tsr) -> f64 {
    let nmo = h.shape()[0];
    iproduct!(0..nmo, 0..nmo).filter(|(p, q)| p != q).map(|(p, q)| h[[p, q]].abs()).fold(0.0, f64::max)
}
