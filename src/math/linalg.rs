//! Small dense linear algebra on top of nalgebra.
//!
//! The only consumer is the curvature estimate at the optimum, which inverts a
//! Hessian of at most 5×5. Sizes are tiny, so clarity wins over speed.

use nalgebra::DMatrix;

/// Invert a symmetric positive-definite matrix.
///
/// Returns `None` if the matrix is not positive definite (Cholesky fails) or
/// the inverse is not finite. The input is symmetrised first so that
/// finite-difference noise in off-diagonal terms does not matter.
pub fn invert_spd(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if m.nrows() != m.ncols() || m.nrows() == 0 {
        return None;
    }
    let sym = (m + m.transpose()) * 0.5;
    let inv = sym.cholesky()?.inverse();
    if inv.iter().all(|v| v.is_finite()) {
        Some(inv)
    } else {
        None
    }
}
