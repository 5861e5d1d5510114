//! Singular-value based pseudo-inverse.

use nalgebra::DMatrix;

/// Moore-Penrose pseudo-inverse of `a` via SVD.
///
/// Singular values at or below `max(rows, cols) · ε · σ_max` are treated as
/// zero, so rank-deficient inputs yield a finite, minimum-norm inverse.
#[must_use]
pub fn pseudo_inverse(a: &DMatrix<f64>) -> DMatrix<f64> {
    let (rows, cols) = a.shape();
    if rows == 0 || cols == 0 {
        return DMatrix::zeros(cols, rows);
    }

    let svd = a.clone().svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return DMatrix::zeros(cols, rows);
    };

    let sigma_max = svd.singular_values.iter().fold(0.0_f64, |m, &s| m.max(s.abs()));
    #[allow(clippy::cast_precision_loss)]
    let tolerance = rows.max(cols) as f64 * f64::EPSILON * sigma_max;

    let inverted = svd
        .singular_values
        .map(|s| if s.abs() > tolerance { 1.0 / s } else { 0.0 });

    v_t.transpose() * DMatrix::from_diagonal(&inverted) * u.transpose()
}
