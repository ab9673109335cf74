//! Closed-form first approximation of the spatial model.
//!
//! The iterative estimation of the quaternion model needs starting
//! values close enough to the solution. A linear least-squares fit of a
//! general 3×3 matrix `T` on the center-of-mass reduced coordinates,
//! followed by a QR decomposition `T = Q·R`, yields an orthogonal
//! rotation factor and an upper-triangular scale/shear factor. The
//! quaternion is read off `Q` by Shepperd's method. The planar and
//! height models are linear in their parameters and start from the
//! default values.

use nalgebra::{DVector, Matrix3, Vector3};

use crate::constants::SQRT_EPS;
use crate::transformation::pairs::HomologousFramePositionPair;
use crate::transformation::parameter::ProcessingType;
use crate::transformation::{
    Transformation, TransformationType, SPATIAL_QUATERNION, SPATIAL_SCALE_SHEAR,
};

impl Transformation {
    /// Derives starting values of the spatial model from the enabled
    /// pairs. Falls back to the default parameters when the pair
    /// geometry is degenerate.
    pub(crate) fn apply_initial_guess(&mut self, pairs: &[HomologousFramePositionPair]) {
        if self.transformation_type() != TransformationType::SpatialAffine {
            return;
        }

        let enabled: Vec<&HomologousFramePositionPair> =
            pairs.iter().filter(|p| p.is_enabled()).collect();
        if enabled.len() < 3 {
            return;
        }

        // center-of-mass reduction of both frames, local to the guess
        let mut com_source = Vector3::zeros();
        let mut com_target = Vector3::zeros();
        for pair in &enabled {
            com_source += Vector3::from_iterator(
                pair.source().position().coordinates().iter().copied(),
            );
            com_target += Vector3::from_iterator(
                pair.target().position().coordinates().iter().copied(),
            );
        }
        com_source /= enabled.len() as f64;
        com_target /= enabled.len() as f64;

        // normal equations of the unconstrained fit X = T·x
        let mut axx = Matrix3::zeros();
        let mut axt = Matrix3::zeros();
        for pair in &enabled {
            let x = Vector3::from_iterator(
                pair.source().position().coordinates().iter().copied(),
            ) - com_source;
            let t = Vector3::from_iterator(
                pair.target().position().coordinates().iter().copied(),
            ) - com_target;
            axx += x * x.transpose();
            axt += t * x.transpose();
        }

        let Some(axx_inverse) = axx.try_inverse() else {
            log::warn!(
                "initial guess skipped, source positions span a degenerate configuration"
            );
            return;
        };
        let affine = axt * axx_inverse;

        let qr = affine.qr();
        let mut q = qr.q();
        let mut r = qr.r();

        // make the diagonal of R positive; Q·R is unchanged
        for i in 0..3 {
            if r[(i, i)] < 0.0 {
                for j in 0..3 {
                    r[(i, j)] = -r[(i, j)];
                    q[(j, i)] = -q[(j, i)];
                }
            }
        }

        if q.determinant() < 0.0 || r[(0, 0)].abs() < SQRT_EPS {
            log::warn!("initial guess skipped, fitted transformation is not orientation preserving");
            return;
        }

        let Some(quaternion) = quaternion_from_rotation(&q) else {
            log::warn!("initial guess skipped, rotation factor is not representable");
            return;
        };

        let scale_shear = [r[(0, 0)], r[(0, 1)], r[(0, 2)], r[(1, 1)], r[(1, 2)], r[(2, 2)]];
        for (&index, value) in SPATIAL_QUATERNION.iter().zip(quaternion) {
            if self.parameters()[index].processing_type() == ProcessingType::Adjustment {
                self.parameters_mut()[index].set_value(value);
            }
        }
        for (&index, value) in SPATIAL_SCALE_SHEAR.iter().zip(scale_shear) {
            if self.parameters()[index].processing_type() == ProcessingType::Adjustment {
                self.parameters_mut()[index].set_value(value);
            }
        }
        self.normalize_quaternion();
    }
}

/// Extracts the quaternion of an orthogonal matrix by Shepperd's
/// maximum-pivot method.
fn quaternion_from_rotation(r: &Matrix3<f64>) -> Option<[f64; 4]> {
    let trace = r.trace();
    let pivots = [trace, r[(0, 0)], r[(1, 1)], r[(2, 2)]];
    let pivot = pivots
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;

    let q = match pivot {
        0 => {
            let q0 = 0.5 * (1.0 + trace).sqrt();
            [
                q0,
                (r[(2, 1)] - r[(1, 2)]) / (4.0 * q0),
                (r[(0, 2)] - r[(2, 0)]) / (4.0 * q0),
                (r[(1, 0)] - r[(0, 1)]) / (4.0 * q0),
            ]
        }
        1 => {
            let q1 = 0.5 * (1.0 + r[(0, 0)] - r[(1, 1)] - r[(2, 2)]).sqrt();
            [
                (r[(2, 1)] - r[(1, 2)]) / (4.0 * q1),
                q1,
                (r[(0, 1)] + r[(1, 0)]) / (4.0 * q1),
                (r[(0, 2)] + r[(2, 0)]) / (4.0 * q1),
            ]
        }
        2 => {
            let q2 = 0.5 * (1.0 - r[(0, 0)] + r[(1, 1)] - r[(2, 2)]).sqrt();
            [
                (r[(0, 2)] - r[(2, 0)]) / (4.0 * q2),
                (r[(0, 1)] + r[(1, 0)]) / (4.0 * q2),
                q2,
                (r[(1, 2)] + r[(2, 1)]) / (4.0 * q2),
            ]
        }
        _ => {
            let q3 = 0.5 * (1.0 - r[(0, 0)] - r[(1, 1)] + r[(2, 2)]).sqrt();
            [
                (r[(1, 0)] - r[(0, 1)]) / (4.0 * q3),
                (r[(0, 2)] + r[(2, 0)]) / (4.0 * q3),
                (r[(1, 2)] + r[(2, 1)]) / (4.0 * q3),
                q3,
            ]
        }
    };

    q.iter().all(|v| v.is_finite()).then_some(q)
}

/// Weighted mean coordinates of the enabled pairs of both frames,
/// used as center-of-mass reduction during the adjustment.
pub(crate) fn center_of_masses(
    pairs: &[HomologousFramePositionPair],
    dimension: usize,
) -> (DVector<f64>, DVector<f64>) {
    let mut com_source = DVector::zeros(dimension);
    let mut com_target = DVector::zeros(dimension);
    let mut count = 0usize;
    for pair in pairs.iter().filter(|p| p.is_enabled()) {
        com_source += pair.source().position().coordinates();
        com_target += pair.target().position().coordinates();
        count += 1;
    }
    if count > 0 {
        com_source /= count as f64;
        com_target /= count as f64;
    }
    (com_source, com_target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::Position;
    use crate::transformation::TransformationConfig;
    use approx::assert_relative_eq;

    fn rotation_z(angle: f64) -> Matrix3<f64> {
        Matrix3::new(
            angle.cos(),
            -angle.sin(),
            0.0,
            angle.sin(),
            angle.cos(),
            0.0,
            0.0,
            0.0,
            1.0,
        )
    }

    #[test]
    fn shepperd_recovers_a_plane_rotation() {
        let angle: f64 = 0.75;
        let q = quaternion_from_rotation(&rotation_z(angle)).unwrap();
        assert_relative_eq!(q[0], (angle / 2.0).cos(), epsilon = 1e-12);
        assert_relative_eq!(q[3], (angle / 2.0).sin(), epsilon = 1e-12);
        assert_relative_eq!(q[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(q[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn shepperd_handles_a_half_turn() {
        // trace = -1, the branch on the dominant diagonal element is taken
        let r = Matrix3::new(-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0);
        let q = quaternion_from_rotation(&r).unwrap();
        assert_relative_eq!(q[0].abs(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(q[3].abs(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn initial_guess_recovers_scale_and_rotation() {
        let config = TransformationConfig::builder(TransformationType::SpatialAffine)
            .build()
            .unwrap();
        let mut transformation = Transformation::new(&config).unwrap();

        let angle: f64 = 0.3;
        let scale = 1.2;
        let r = rotation_z(angle);
        let sources = [
            [10.0, 0.0, 0.0],
            [0.0, 10.0, 0.0],
            [0.0, 0.0, 10.0],
            [5.0, 5.0, 1.0],
        ];
        let mut pairs = Vec::new();
        for (i, s) in sources.iter().enumerate() {
            let x = Vector3::from_row_slice(s);
            let t = scale * r * x + Vector3::new(1.0, 2.0, 3.0);
            pairs.push(
                HomologousFramePositionPair::new(
                    &format!("p{i}"),
                    Position::new(s).unwrap(),
                    Position::new(&[t[0], t[1], t[2]]).unwrap(),
                )
                .unwrap(),
            );
        }

        transformation.apply_initial_guess(&pairs);

        assert_relative_eq!(
            transformation.value(SPATIAL_QUATERNION[0]),
            (angle / 2.0).cos(),
            epsilon = 1e-9
        );
        assert_relative_eq!(
            transformation.value(SPATIAL_QUATERNION[3]),
            (angle / 2.0).sin(),
            epsilon = 1e-9
        );
        assert_relative_eq!(
            transformation.value(SPATIAL_SCALE_SHEAR[0]),
            scale,
            epsilon = 1e-9
        );
    }
}
