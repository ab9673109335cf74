//! Dense linear algebra kernel of the adjustment core.
//!
//! Wraps the [`nalgebra`] decompositions used by the estimators: solution
//! and inversion of (possibly bordered) normal-equation systems with
//! diagonal preconditioning, Moore–Penrose pseudo inverse for singular
//! cofactor blocks and sorted symmetric eigen-decompositions for
//! confidence regions and principal components.

use itertools::Itertools;
use nalgebra::{DMatrix, DVector};

use crate::adjust_errors::AdjustmentError;
use crate::constants::EPS;

/// Solution of a normal-equation system `N * x = n`.
#[derive(Debug, Clone)]
pub struct NormalEquationSolution {
    /// Solution vector `x`, including possible Lagrange multipliers.
    pub x: DVector<f64>,
    /// Inverse of `N` (cofactor matrix), present when requested.
    pub inverse: Option<DMatrix<f64>>,
}

/// Solves the symmetric system `N * x = n` and optionally inverts `N`.
///
/// The system may be indefinite (normal equations bordered by restriction
/// rows), hence an LU factorization is used instead of a Cholesky one.
/// A diagonal preconditioner `V = diag(1/sqrt(N_ii))` stabilizes poorly
/// scaled systems and is removed from the solution and the inverse again.
///
/// Arguments
/// ---------
/// * `n_matrix`: symmetric coefficient matrix `N`.
/// * `n_vector`: right-hand side `n`.
/// * `invert`: request the inverse of `N` (cofactor matrix).
///
/// Return
/// ------
/// * The solution vector and, if requested, the inverse of `N`.
/// * [`AdjustmentError::SingularSystem`] when `N` is rank deficient or
///   the solution contains non-finite components.
pub fn solve_symmetric_system(
    n_matrix: &DMatrix<f64>,
    n_vector: &DVector<f64>,
    invert: bool,
) -> Result<NormalEquationSolution, AdjustmentError> {
    let size = n_matrix.nrows();
    if size != n_matrix.ncols() || size != n_vector.len() {
        return Err(AdjustmentError::SingularSystem(format!(
            "dimension mismatch, N is {}x{} but n has {} rows",
            n_matrix.nrows(),
            n_matrix.ncols(),
            n_vector.len()
        )));
    }

    // preconditioner from the main diagonal
    let mut v = DVector::<f64>::from_element(size, 1.0);
    for i in 0..size {
        let d = n_matrix[(i, i)];
        if d > EPS {
            v[i] = 1.0 / d.sqrt();
        }
    }

    let mut m = n_matrix.clone();
    let mut rhs = n_vector.clone();
    for r in 0..size {
        rhs[r] *= v[r];
        for c in 0..size {
            m[(r, c)] *= v[r] * v[c];
        }
    }

    let lu = m.lu();
    let mut x = lu
        .solve(&rhs)
        .ok_or_else(|| AdjustmentError::SingularSystem("normal equation matrix is singular".into()))?;

    for i in 0..size {
        x[i] *= v[i];
    }
    if x.iter().any(|xi| !xi.is_finite()) {
        return Err(AdjustmentError::SingularSystem(
            "solution of normal equations is not finite".into(),
        ));
    }

    let inverse = if invert {
        let mut q = lu.try_inverse().ok_or_else(|| {
            AdjustmentError::SingularSystem("normal equation matrix is not invertible".into())
        })?;
        for r in 0..size {
            for c in 0..size {
                q[(r, c)] *= v[r] * v[c];
            }
        }
        if q.iter().any(|qi| !qi.is_finite()) {
            return Err(AdjustmentError::SingularSystem(
                "cofactor matrix is not finite".into(),
            ));
        }
        Some(q)
    } else {
        None
    };

    Ok(NormalEquationSolution { x, inverse })
}

/// Inverts a small symmetric positive definite dispersion block.
pub fn invert_dispersion(d: &DMatrix<f64>) -> Result<DMatrix<f64>, AdjustmentError> {
    if d.nrows() == 1 {
        let variance = d[(0, 0)];
        if variance <= 0.0 {
            return Err(AdjustmentError::SingularSystem(
                "dispersion matrix is singular".into(),
            ));
        }
        return Ok(DMatrix::from_element(1, 1, 1.0 / variance));
    }

    d.clone()
        .cholesky()
        .map(|chol| chol.inverse())
        .ok_or_else(|| AdjustmentError::SingularSystem("dispersion matrix is singular".into()))
}

/// Moore–Penrose pseudo inverse via singular value decomposition.
///
/// Singular values below `n * sigma_max * EPS` are truncated, so rank
/// deficient cofactor blocks (e.g. of a datum point held fixed along one
/// axis) yield a valid weight matrix instead of an error.
pub fn pseudo_inverse(m: &DMatrix<f64>) -> Result<DMatrix<f64>, AdjustmentError> {
    let tolerance = m.nrows() as f64 * m.norm() * EPS;
    m.clone()
        .pseudo_inverse(tolerance.max(EPS))
        .map_err(|e| AdjustmentError::SingularSystem(e.to_string()))
}

/// Sorted symmetric eigen-decomposition.
///
/// Return
/// ------
/// * Eigenvalues in descending order and the matching eigenvector columns.
pub fn sorted_symmetric_eigen(m: &DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
    let eigen = m.clone().symmetric_eigen();
    let size = eigen.eigenvalues.len();

    let order = (0..size).sorted_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let mut values = DVector::<f64>::zeros(size);
    let mut vectors = DMatrix::<f64>::zeros(size, size);
    for (k, i) in order.enumerate() {
        values[k] = eigen.eigenvalues[i];
        vectors.set_column(k, &eigen.eigenvectors.column(i));
    }
    (values, vectors)
}

/// Maps an angle into the interval `[0, 2π)`.
pub fn mod_2pi(angle: f64) -> f64 {
    let tau = std::f64::consts::TAU;
    let a = angle % tau;
    if a < 0.0 {
        a + tau
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn solve_and_invert_spd_system() {
        let n = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let rhs = DVector::from_row_slice(&[1.0, 2.0]);

        let solution = solve_symmetric_system(&n, &rhs, true).unwrap();
        let residual = &n * &solution.x - &rhs;
        assert_relative_eq!(residual.norm(), 0.0, epsilon = 1e-12);

        let q = solution.inverse.unwrap();
        let identity = DMatrix::<f64>::identity(2, 2);
        assert_relative_eq!((&n * &q - identity).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn singular_system_is_detected() {
        let n = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let rhs = DVector::from_row_slice(&[1.0, 1.0]);
        assert!(solve_symmetric_system(&n, &rhs, false).is_err());
    }

    #[test]
    fn pseudo_inverse_of_rank_deficient_block() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 0.0]);
        let p = pseudo_inverse(&m).unwrap();
        assert_relative_eq!(p[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(p[(1, 1)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn eigenvalues_are_sorted_descending() {
        let m = DMatrix::from_row_slice(3, 3, &[2.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 1.0]);
        let (values, vectors) = sorted_symmetric_eigen(&m);
        assert_relative_eq!(values[0], 5.0, epsilon = 1e-12);
        assert_relative_eq!(values[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(values[2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(vectors.column(0)[1].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn angle_normalization() {
        assert_relative_eq!(mod_2pi(-0.5), std::f64::consts::TAU - 0.5, epsilon = 1e-12);
        assert_relative_eq!(mod_2pi(7.0), 7.0 - std::f64::consts::TAU, epsilon = 1e-12);
    }
}
