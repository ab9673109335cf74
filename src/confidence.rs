//! # Confidence regions and principal components
//!
//! Spectral decomposition of 1D to 3D covariance blocks into confidence
//! intervals, ellipses and ellipsoids, the classical Helmert error
//! ellipse, and the principal component analysis of a residual field.

use nalgebra::{DMatrix, DVector, Matrix3};

use crate::adjust_errors::AdjustmentError;
use crate::constants::EPS;
use crate::linalg::{mod_2pi, sorted_symmetric_eigen};
use crate::points::PointGroup;

/// Spectral confidence region of a covariance block.
///
/// The eigenvalues are sorted in descending order and clamped at zero,
/// so the semi-axes are well defined for covariances that lost positive
/// definiteness to rounding.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceRegion {
    dimension: usize,
    eigenvalues: DVector<f64>,
    eigenvectors: DMatrix<f64>,
}

impl ConfidenceRegion {
    pub fn new(covariance: &DMatrix<f64>) -> Result<Self, AdjustmentError> {
        let dimension = covariance.nrows();
        if !(1..=3).contains(&dimension) || covariance.ncols() != dimension {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "confidence region expects a 1x1, 2x2 or 3x3 covariance, got {}x{}",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        let (mut eigenvalues, mut eigenvectors) = sorted_symmetric_eigen(covariance);
        for value in eigenvalues.iter_mut() {
            *value = value.max(0.0);
        }
        // eigenvectors of a proper rotation, not a reflection
        if eigenvectors.determinant() < 0.0 {
            let last = dimension - 1;
            for i in 0..dimension {
                eigenvectors[(i, last)] = -eigenvectors[(i, last)];
            }
        }
        Ok(Self {
            dimension,
            eigenvalues,
            eigenvectors,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn eigenvalues(&self) -> &DVector<f64> {
        &self.eigenvalues
    }

    pub fn eigenvectors(&self) -> &DMatrix<f64> {
        &self.eigenvectors
    }

    /// Semi-axes of the 1σ region, the square roots of the eigenvalues
    /// in descending order.
    pub fn axes(&self) -> DVector<f64> {
        DVector::from_iterator(self.dimension, self.eigenvalues.iter().map(|v| v.sqrt()))
    }

    /// Semi-axes scaled to the confidence level of a variance-ratio
    /// quantile with `dimension` numerator degrees of freedom.
    pub fn confidence_axes(&self, quantile: f64) -> DVector<f64> {
        let scale = self.dimension as f64 * quantile;
        DVector::from_iterator(
            self.dimension,
            self.eigenvalues.iter().map(|v| (v * scale).sqrt()),
        )
    }

    /// Orientation of the region: the rotation angle of the major axis
    /// in 2D, the Cardan angles of the eigenvector frame in 3D, empty
    /// in 1D.
    pub fn euler_angles(&self) -> DVector<f64> {
        match self.dimension {
            2 => {
                let angle = mod_2pi(f64::atan2(
                    self.eigenvectors[(1, 0)],
                    self.eigenvectors[(0, 0)],
                ));
                DVector::from_element(1, angle)
            }
            3 => {
                let r = Matrix3::from_fn(|i, j| self.eigenvectors[(i, j)]);
                let cy = f64::hypot(r[(1, 2)], r[(2, 2)]);
                if cy > 16.0 * EPS {
                    DVector::from_row_slice(&[
                        mod_2pi(f64::atan2(-r[(1, 2)], r[(2, 2)])),
                        mod_2pi(f64::atan2(r[(0, 2)], cy)),
                        mod_2pi(f64::atan2(-r[(0, 1)], r[(0, 0)])),
                    ])
                } else {
                    DVector::from_row_slice(&[
                        mod_2pi(f64::atan2(r[(1, 0)], r[(1, 1)])),
                        mod_2pi(f64::atan2(r[(0, 2)], cy)),
                        0.0,
                    ])
                }
            }
            _ => DVector::zeros(0),
        }
    }
}

/// Helmert error ellipse of a 2D covariance block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HelmertEllipse {
    pub major_axis: f64,
    pub minor_axis: f64,
    /// Bearing of the major axis.
    pub angle: f64,
}

impl HelmertEllipse {
    pub fn from_covariance(qxx: f64, qyy: f64, qxy: f64) -> Self {
        let w = f64::hypot(qxx - qyy, 2.0 * qxy);
        Self {
            major_axis: (0.5 * (qxx + qyy + w)).max(0.0).sqrt(),
            minor_axis: (0.5 * (qxx + qyy - w)).max(0.0).sqrt(),
            angle: 0.5 * f64::atan2(2.0 * qxy, qxx - qyy),
        }
    }
}

/// One eigenpair of a principal component analysis; the components are
/// numbered from the largest eigenvalue downwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrincipalComponent {
    pub index: usize,
    pub eigenvalue: f64,
}

/// Principal component analysis of the dispersion of a point field.
///
/// `covariance` is the joint cofactor matrix of the point coordinates,
/// `dimension` entries per point in group order, scaled here by the
/// variance of unit weight. The projection of the dominant eigenvector
/// onto each point is stored in its result as the first principal
/// component.
pub fn principal_component_analysis(
    points: &mut PointGroup,
    covariance: &DMatrix<f64>,
    variance_of_unit_weight: f64,
) -> Result<Vec<PrincipalComponent>, AdjustmentError> {
    let dimension = points.dimension();
    let size = points.len() * dimension;
    if covariance.nrows() != size || covariance.ncols() != size {
        return Err(AdjustmentError::InvalidConfiguration(format!(
            "covariance must be {size}x{size} for {} {dimension}D points",
            points.len()
        )));
    }
    if size == 0 {
        return Ok(Vec::new());
    }

    let (eigenvalues, eigenvectors) = sorted_symmetric_eigen(&(covariance * variance_of_unit_weight));
    let components = eigenvalues
        .iter()
        .enumerate()
        .map(|(i, &value)| PrincipalComponent {
            index: i + 1,
            eigenvalue: value.abs(),
        })
        .collect();

    let dominant = eigenvalues[0].abs().sqrt();
    for (k, point) in points.points_mut().iter_mut().enumerate() {
        let slice = DVector::from_iterator(
            dimension,
            (0..dimension).map(|i| dominant * eigenvectors[(k * dimension + i, 0)]),
        );
        point.result_mut().first_principal_component = Some(slice);
    }
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::{Point, PointGroupType, Position};
    use approx::assert_relative_eq;

    #[test]
    fn axes_of_a_diagonal_covariance_are_its_roots() {
        let covariance = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 1.0]);
        let region = ConfidenceRegion::new(&covariance).unwrap();
        let axes = region.axes();
        assert_relative_eq!(axes[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(axes[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn helmert_ellipse_matches_the_spectral_region() {
        let (qxx, qyy, qxy) = (2.5, 1.0, 0.8);
        let covariance = DMatrix::from_row_slice(2, 2, &[qxx, qxy, qxy, qyy]);
        let region = ConfidenceRegion::new(&covariance).unwrap();
        let ellipse = HelmertEllipse::from_covariance(qxx, qyy, qxy);
        let axes = region.axes();
        assert_relative_eq!(ellipse.major_axis, axes[0], epsilon = 1e-12);
        assert_relative_eq!(ellipse.minor_axis, axes[1], epsilon = 1e-12);
    }

    #[test]
    fn negative_rounding_eigenvalues_are_clamped() {
        let covariance = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0 - 1e-16]);
        let region = ConfidenceRegion::new(&covariance).unwrap();
        assert!(region.eigenvalues().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn dominant_component_points_along_the_largest_variance() {
        let mut group = PointGroup::new(PointGroupType::New, 2).unwrap();
        group
            .add(Point::new("1", Position::new(&[0.0, 0.0]).unwrap()))
            .unwrap();
        // variance concentrated on the y axis of the single point
        let covariance = DMatrix::from_row_slice(2, 2, &[0.01, 0.0, 0.0, 4.0]);
        let components = principal_component_analysis(&mut group, &covariance, 1.0).unwrap();
        assert_eq!(components.len(), 2);
        assert_relative_eq!(components[0].eigenvalue, 4.0, epsilon = 1e-12);

        let first = group.points()[0]
            .result()
            .first_principal_component
            .clone()
            .unwrap();
        assert_relative_eq!(first[0].abs(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(first[1].abs(), 2.0, epsilon = 1e-9);
    }
}
