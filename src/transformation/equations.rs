//! Condition equations of the transformation models.
//!
//! For every homologous position pair the models contribute a misclosure
//! vector `w` and the Jacobians with respect to the unknown parameters
//! (`Jx`) and to the observed positions of both frames (`Jv`). The 3D
//! model is `X' = t + R(q)·S·x` with a quaternion rotation `R(q)` and an
//! upper-triangular scale/shear matrix `S`; the planar and height models
//! are linear in their parameters.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::constants::EPS;
use crate::linalg::mod_2pi;
use crate::points::Position;
use crate::transformation::pairs::{EstimatedFramePosition, FramePositionPair};
use crate::transformation::parameter::{ParameterType, ProcessingType, UnknownParameter};
use crate::transformation::{
    Transformation, TransformationType, HEIGHT_SCALE, HEIGHT_SHIFT, PLANAR_MATRIX, PLANAR_SHIFT,
    SPATIAL_QUATERNION, SPATIAL_SCALE_SHEAR, SPATIAL_SHIFT,
};

/// Jacobians and misclosure of one position pair.
pub(crate) struct NormalEquationElements {
    pub jx: DMatrix<f64>,
    pub jv_source: DMatrix<f64>,
    pub jv_target: DMatrix<f64>,
    pub misclosure: DVector<f64>,
}

impl Transformation {
    /// Rotation matrix `R(q)` of the spatial model.
    pub(crate) fn rotation_matrix(&self) -> Matrix3<f64> {
        let [q0, q1, q2, q3] = SPATIAL_QUATERNION.map(|i| self.value(i));
        Matrix3::new(
            2.0 * q0 * q0 - 1.0 + 2.0 * q1 * q1,
            2.0 * (q1 * q2 - q0 * q3),
            2.0 * (q1 * q3 + q0 * q2),
            2.0 * (q1 * q2 + q0 * q3),
            2.0 * q0 * q0 - 1.0 + 2.0 * q2 * q2,
            2.0 * (q2 * q3 - q0 * q1),
            2.0 * (q1 * q3 - q0 * q2),
            2.0 * (q2 * q3 + q0 * q1),
            2.0 * q0 * q0 - 1.0 + 2.0 * q3 * q3,
        )
    }

    /// Partial derivatives `∂R/∂q_k`.
    fn rotation_matrix_partials(&self) -> [Matrix3<f64>; 4] {
        let [q0, q1, q2, q3] = SPATIAL_QUATERNION.map(|i| self.value(i));
        [
            Matrix3::new(
                4.0 * q0, -2.0 * q3, 2.0 * q2, //
                2.0 * q3, 4.0 * q0, -2.0 * q1, //
                -2.0 * q2, 2.0 * q1, 4.0 * q0,
            ),
            Matrix3::new(
                4.0 * q1, 2.0 * q2, 2.0 * q3, //
                2.0 * q2, 0.0, -2.0 * q0, //
                2.0 * q3, 2.0 * q0, 0.0,
            ),
            Matrix3::new(
                0.0, 2.0 * q1, 2.0 * q0, //
                2.0 * q1, 4.0 * q2, 2.0 * q3, //
                -2.0 * q0, 2.0 * q3, 0.0,
            ),
            Matrix3::new(
                0.0, -2.0 * q0, 2.0 * q1, //
                2.0 * q0, 0.0, 2.0 * q2, //
                2.0 * q1, 2.0 * q2, 4.0 * q3,
            ),
        ]
    }

    /// Upper-triangular scale/shear matrix `S` of the spatial model.
    pub(crate) fn scale_shear_matrix(&self) -> Matrix3<f64> {
        let [s11, s12, s13, s22, s23, s33] = SPATIAL_SCALE_SHEAR.map(|i| self.value(i));
        Matrix3::new(s11, s12, s13, 0.0, s22, s23, 0.0, 0.0, s33)
    }

    /// Linear matrix `M` of the model, such that `X' = t + M·x` in
    /// reduced coordinates. `M` also is the Jacobian with respect to the
    /// source position.
    pub(crate) fn linear_matrix(&self) -> DMatrix<f64> {
        match self.transformation_type() {
            TransformationType::Height => {
                DMatrix::from_element(1, 1, self.value(HEIGHT_SCALE))
            }
            TransformationType::PlanarAffine => {
                let [a11, a12, a21, a22] = PLANAR_MATRIX.map(|i| self.value(i));
                DMatrix::from_row_slice(2, 2, &[a11, -a12, a21, a22])
            }
            TransformationType::SpatialAffine => {
                let rs = self.rotation_matrix() * self.scale_shear_matrix();
                DMatrix::from_fn(3, 3, |r, c| rs[(r, c)])
            }
        }
    }

    /// Shift vector `t` of the model.
    pub(crate) fn shift_vector(&self) -> DVector<f64> {
        match self.transformation_type() {
            TransformationType::Height => DVector::from_element(1, self.value(HEIGHT_SHIFT)),
            TransformationType::PlanarAffine => {
                DVector::from_iterator(2, PLANAR_SHIFT.iter().map(|&i| self.value(i)))
            }
            TransformationType::SpatialAffine => {
                DVector::from_iterator(3, SPATIAL_SHIFT.iter().map(|&i| self.value(i)))
            }
        }
    }

    /// Parameter Jacobian `Jx` evaluated at the reduced source
    /// coordinates `xi`. Columns of fixed parameters stay zero.
    pub(crate) fn parameter_jacobian(&self, xi: &DVector<f64>, nou: usize) -> DMatrix<f64> {
        let dim = self.dimension();
        let mut jx = DMatrix::<f64>::zeros(dim, nou);
        let mut set = |index: usize, entries: &[(usize, f64)]| {
            let column = self.parameters()[index].column();
            if column >= 0 {
                for &(row, value) in entries {
                    jx[(row, column as usize)] = value;
                }
            }
        };

        match self.transformation_type() {
            TransformationType::Height => {
                set(HEIGHT_SHIFT, &[(0, 1.0)]);
                set(HEIGHT_SCALE, &[(0, xi[0])]);
            }
            TransformationType::PlanarAffine => {
                set(PLANAR_SHIFT[0], &[(0, 1.0)]);
                set(PLANAR_SHIFT[1], &[(1, 1.0)]);
                set(PLANAR_MATRIX[0], &[(0, xi[0])]);
                set(PLANAR_MATRIX[1], &[(0, -xi[1])]);
                set(PLANAR_MATRIX[2], &[(1, xi[0])]);
                set(PLANAR_MATRIX[3], &[(1, xi[1])]);
            }
            TransformationType::SpatialAffine => {
                let r = self.rotation_matrix();
                let dr = self.rotation_matrix_partials();
                let [s11, s12, s13, s22, s23, s33] = SPATIAL_SCALE_SHEAR.map(|i| self.value(i));
                let sm = Vector3::new(
                    s11 * xi[0] + s12 * xi[1] + s13 * xi[2],
                    s22 * xi[1] + s23 * xi[2],
                    s33 * xi[2],
                );

                for (k, &index) in SPATIAL_SHIFT.iter().enumerate() {
                    set(index, &[(k, 1.0)]);
                }
                for (k, &index) in SPATIAL_QUATERNION.iter().enumerate() {
                    let column = dr[k] * sm;
                    set(index, &[(0, column[0]), (1, column[1]), (2, column[2])]);
                }
                // (element of S, rotation column, reduced coordinate)
                let scale_shear = [
                    (SPATIAL_SCALE_SHEAR[0], 0, xi[0]),
                    (SPATIAL_SCALE_SHEAR[1], 0, xi[1]),
                    (SPATIAL_SCALE_SHEAR[2], 0, xi[2]),
                    (SPATIAL_SCALE_SHEAR[3], 1, xi[1]),
                    (SPATIAL_SCALE_SHEAR[4], 1, xi[2]),
                    (SPATIAL_SCALE_SHEAR[5], 2, xi[2]),
                ];
                for (index, r_column, coordinate) in scale_shear {
                    set(
                        index,
                        &[
                            (0, r[(0, r_column)] * coordinate),
                            (1, r[(1, r_column)] * coordinate),
                            (2, r[(2, r_column)] * coordinate),
                        ],
                    );
                }
            }
        }
        jx
    }

    /// Builds `Jx`, `Jv` of both frames and the misclosure of one pair.
    pub(crate) fn normal_equation_elements(
        &self,
        source: &Position,
        target: &Position,
        nou: usize,
    ) -> NormalEquationElements {
        let dim = self.dimension();
        let (com_source, com_target) = self.center_of_masses();
        let xi = source.coordinates() - com_source;
        let ti = target.coordinates() - com_target;

        let jv_source = self.linear_matrix();
        let misclosure = self.shift_vector() + &jv_source * &xi - ti;
        let jx = self.parameter_jacobian(&xi, nou);
        let jv_target = -DMatrix::<f64>::identity(dim, dim);

        NormalEquationElements {
            jx,
            jv_source,
            jv_target,
            misclosure,
        }
    }

    /// Removes the center-of-mass reduction from the estimated shift and
    /// propagates the change into the parameter cofactor matrix.
    ///
    /// `t' = com_target + t - M·com_source`; the cofactor matrix is
    /// transformed by the Jacobian of this re-derivation.
    pub(crate) fn reverse_center_of_masses(&mut self, qxx: Option<&mut DMatrix<f64>>) {
        let (com_source, com_target) = {
            let (s, t) = self.center_of_masses();
            (s.clone(), t.clone())
        };

        let shift_indices: &[usize] = match self.transformation_type() {
            TransformationType::Height => &[HEIGHT_SHIFT],
            TransformationType::PlanarAffine => &PLANAR_SHIFT,
            TransformationType::SpatialAffine => &SPATIAL_SHIFT,
        };

        if let Some(qxx) = qxx {
            let nou = qxx.nrows();
            let jx_com = self.parameter_jacobian(&com_source, nou);
            let mut jacobian = DMatrix::<f64>::identity(nou, nou);
            for (row, &index) in shift_indices.iter().enumerate() {
                let shift_column = self.parameters()[index].column();
                if shift_column < 0 {
                    continue;
                }
                for column in 0..nou {
                    if column == shift_column as usize {
                        continue;
                    }
                    jacobian[(shift_column as usize, column)] = -jx_com[(row, column)];
                }
            }
            *qxx = &jacobian * &*qxx * jacobian.transpose();
        }

        let t_new = com_target + self.shift_vector() - self.linear_matrix() * com_source;
        for (row, &index) in shift_indices.iter().enumerate() {
            self.parameters_mut()[index].set_value(t_new[row]);
        }
        self.reset_center_of_masses();
    }

    /// Applies the estimated model to a frame position pair and
    /// propagates the parameter and source-position cofactors into the
    /// transformed target position.
    pub(crate) fn transform(
        &self,
        pair: &mut FramePositionPair,
        qxx: &DMatrix<f64>,
        variance0: f64,
    ) {
        let coordinates = self.shift_vector() + self.linear_matrix() * pair.source().coordinates();

        let jx = self.parameter_jacobian(pair.source().coordinates(), qxx.nrows());
        let jv = self.linear_matrix();
        let cofactor_matrix =
            &jx * qxx * jx.transpose() + &jv * (pair.source().dispersion_apriori() / variance0) * jv.transpose();
        let cofactors = DVector::from_iterator(
            self.dimension(),
            (0..self.dimension()).map(|i| cofactor_matrix[(i, i)]),
        );

        let residuals = pair
            .target_observed()
            .map(|observed| &coordinates - observed.coordinates());

        pair.set_target_estimated(EstimatedFramePosition {
            coordinates,
            cofactors,
            residuals,
        });
    }

    /// Derives the geometric parameters (Euler angles, scales, shear
    /// angles) from the adjusted model, together with their cofactors
    /// propagated through the analytic Jacobians.
    pub(crate) fn derived_parameters(&self, qxx: &DMatrix<f64>) -> Vec<(UnknownParameter, f64)> {
        match self.transformation_type() {
            TransformationType::Height => Vec::new(),
            TransformationType::PlanarAffine => self.derived_planar_parameters(qxx),
            TransformationType::SpatialAffine => self.derived_spatial_parameters(qxx),
        }
    }

    /// Cofactor `g' Qxx g` of a scalar function with gradient `g` over
    /// the model parameters (given by index), skipping fixed parameters.
    fn propagate(&self, qxx: &DMatrix<f64>, gradient: &[(usize, f64)]) -> f64 {
        let mut cofactor = 0.0;
        for &(i, gi) in gradient {
            let ci = self.parameters()[i].column();
            if ci < 0 {
                continue;
            }
            for &(j, gj) in gradient {
                let cj = self.parameters()[j].column();
                if cj < 0 {
                    continue;
                }
                cofactor += gi * gj * qxx[(ci as usize, cj as usize)];
            }
        }
        cofactor.max(0.0)
    }

    fn derived_planar_parameters(&self, qxx: &DMatrix<f64>) -> Vec<(UnknownParameter, f64)> {
        let [a11, a12, a21, a22] = PLANAR_MATRIX.map(|i| self.value(i));
        let [i11, i12, i21, i22] = PLANAR_MATRIX;

        let mut derived = Vec::new();
        let mut push = |parameter_type, expected, value: f64, gradient: &[(usize, f64)]| {
            let mut parameter =
                UnknownParameter::new(parameter_type, ProcessingType::PostProcessing, expected);
            parameter.set_value(value);
            derived.push((parameter, self.propagate(qxx, gradient)));
        };

        let d = a11 * a11 + a21 * a21;
        if d > EPS {
            let rotation = mod_2pi(f64::atan2(a21, a11));
            push(
                ParameterType::EulerAngleZ,
                0.0,
                rotation,
                &[(i11, -a21 / d), (i21, a11 / d)],
            );

            let scale_x = d.sqrt();
            push(
                ParameterType::ScaleX,
                1.0,
                scale_x,
                &[(i11, a11 / scale_x), (i21, a21 / scale_x)],
            );

            let det = a11 * a22 + a12 * a21;
            let scale_y = det / scale_x;
            push(
                ParameterType::ScaleY,
                1.0,
                scale_y,
                &[
                    (i11, a22 / scale_x - det * a11 / (scale_x * d)),
                    (i12, a21 / scale_x),
                    (i21, a12 / scale_x - det * a21 / (scale_x * d)),
                    (i22, a11 / scale_x),
                ],
            );
        }
        derived
    }

    fn derived_spatial_parameters(&self, qxx: &DMatrix<f64>) -> Vec<(UnknownParameter, f64)> {
        let r = self.rotation_matrix();
        let [q0, q1, q2, q3] = SPATIAL_QUATERNION.map(|i| self.value(i));
        let [iq0, iq1, iq2, iq3] = SPATIAL_QUATERNION;
        let [s11, s12, s13, s22, s23, s33] = SPATIAL_SCALE_SHEAR.map(|i| self.value(i));
        let [i11, i12, i13, i22, i23, i33] = SPATIAL_SCALE_SHEAR;

        let mut derived = Vec::new();
        let mut push = |parameter_type, expected, value: f64, gradient: &[(usize, f64)]| {
            let mut parameter =
                UnknownParameter::new(parameter_type, ProcessingType::PostProcessing, expected);
            parameter.set_value(value);
            derived.push((parameter, self.propagate(qxx, gradient)));
        };

        // partial derivatives of the entering elements of R(q)
        let dr11 = [4.0 * q0, 4.0 * q1, 0.0, 0.0];
        let dr12 = [-2.0 * q3, 2.0 * q2, 2.0 * q1, -2.0 * q0];
        let dr13 = [2.0 * q2, 2.0 * q3, 2.0 * q0, 2.0 * q1];
        let dr23 = [-2.0 * q1, -2.0 * q0, 2.0 * q3, 2.0 * q2];
        let dr33 = [4.0 * q0, 0.0, 0.0, 4.0 * q3];

        let quaternion_gradient = |partials: [f64; 4]| {
            vec![
                (iq0, partials[0]),
                (iq1, partials[1]),
                (iq2, partials[2]),
                (iq3, partials[3]),
            ]
        };

        let (r11, r12, r13) = (r[(0, 0)], r[(0, 1)], r[(0, 2)]);
        let (r21, r22, r23) = (r[(1, 0)], r[(1, 1)], r[(1, 2)]);
        let r33 = r[(2, 2)];

        let cy = f64::hypot(r23, r33);
        if cy > 16.0 * EPS {
            // rx = atan2(-r23, r33)
            let dx = r23 * r23 + r33 * r33;
            let gx: Vec<f64> = (0..4)
                .map(|k| (-r33 * dr23[k] + r23 * dr33[k]) / dx)
                .collect();
            push(
                ParameterType::EulerAngleX,
                0.0,
                mod_2pi(f64::atan2(-r23, r33)),
                &quaternion_gradient([gx[0], gx[1], gx[2], gx[3]]),
            );

            // ry = atan2(r13, cy)
            let dy = r13 * r13 + cy * cy;
            let gy: Vec<f64> = (0..4)
                .map(|k| {
                    let dcy = (r23 * dr23[k] + r33 * dr33[k]) / cy;
                    (cy * dr13[k] - r13 * dcy) / dy
                })
                .collect();
            push(
                ParameterType::EulerAngleY,
                0.0,
                mod_2pi(f64::atan2(r13, cy)),
                &quaternion_gradient([gy[0], gy[1], gy[2], gy[3]]),
            );

            // rz = atan2(-r12, r11)
            let dz = r12 * r12 + r11 * r11;
            let gz: Vec<f64> = (0..4)
                .map(|k| (-r11 * dr12[k] + r12 * dr11[k]) / dz)
                .collect();
            push(
                ParameterType::EulerAngleZ,
                0.0,
                mod_2pi(f64::atan2(-r12, r11)),
                &quaternion_gradient([gz[0], gz[1], gz[2], gz[3]]),
            );
        } else {
            // gimbal lock, the x and z rotations are not separable
            push(
                ParameterType::EulerAngleX,
                0.0,
                mod_2pi(f64::atan2(r21, r22)),
                &[],
            );
            push(
                ParameterType::EulerAngleY,
                0.0,
                mod_2pi(0.5 * std::f64::consts::PI * r13.signum()),
                &[],
            );
            push(ParameterType::EulerAngleZ, 0.0, 0.0, &[]);
        }

        // scales are the column lengths of S
        push(
            ParameterType::ScaleX,
            1.0,
            s11.abs(),
            &[(i11, s11.signum())],
        );
        let scale_y = f64::hypot(s12, s22);
        if scale_y > EPS {
            push(
                ParameterType::ScaleY,
                1.0,
                scale_y,
                &[(i12, s12 / scale_y), (i22, s22 / scale_y)],
            );
        }
        let scale_z = (s13 * s13 + s23 * s23 + s33 * s33).sqrt();
        if scale_z > EPS {
            push(
                ParameterType::ScaleZ,
                1.0,
                scale_z,
                &[
                    (i13, s13 / scale_z),
                    (i23, s23 / scale_z),
                    (i33, s33 / scale_z),
                ],
            );
        }

        // shear angles from the off-diagonal ratios of S
        let mut shear = |parameter_type, numerator: f64, denominator: f64, ni, di| {
            let d = numerator * numerator + denominator * denominator;
            if d > EPS {
                push(
                    parameter_type,
                    0.0,
                    f64::atan2(numerator, denominator),
                    &[(ni, denominator / d), (di, -numerator / d)],
                );
            }
        };
        shear(ParameterType::ShearX, s23, s33, i23, i33);
        shear(ParameterType::ShearY, s13, s33, i13, i33);
        shear(ParameterType::ShearZ, s12, s22, i12, i22);

        derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformation::TransformationConfig;
    use approx::assert_relative_eq;

    fn spatial() -> Transformation {
        let config = TransformationConfig::builder(TransformationType::SpatialAffine)
            .build()
            .unwrap();
        Transformation::new(&config).unwrap()
    }

    #[test]
    fn identity_parameters_yield_identity_model() {
        let transformation = spatial();
        let r = transformation.rotation_matrix();
        assert_relative_eq!((r - Matrix3::identity()).norm(), 0.0, epsilon = 1e-14);
        let m = transformation.linear_matrix();
        assert_relative_eq!(
            (m - DMatrix::identity(3, 3)).norm(),
            0.0,
            epsilon = 1e-14
        );
    }

    #[test]
    fn rotation_partials_match_finite_differences() {
        let mut transformation = spatial();
        // an arbitrary non-trivial unit quaternion
        for (&i, value) in SPATIAL_QUATERNION.iter().zip([0.9, 0.2, -0.3, 0.1]) {
            transformation.parameters_mut()[i].set_value(value);
        }
        transformation.normalize_quaternion();

        let h = 1e-7;
        let partials = transformation.rotation_matrix_partials();
        for (k, &index) in SPATIAL_QUATERNION.iter().enumerate() {
            let q = transformation.value(index);
            transformation.parameters_mut()[index].set_value(q + h);
            let r_plus = transformation.rotation_matrix();
            transformation.parameters_mut()[index].set_value(q - h);
            let r_minus = transformation.rotation_matrix();
            transformation.parameters_mut()[index].set_value(q);

            let numeric = (r_plus - r_minus) / (2.0 * h);
            assert_relative_eq!((numeric - partials[k]).norm(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn misclosure_vanishes_for_exactly_mapped_pair() {
        let transformation = spatial();
        let source = Position::new(&[1.0, 2.0, 3.0]).unwrap();
        let target = Position::new(&[1.0, 2.0, 3.0]).unwrap();
        // identity model, no unknown columns assigned yet (nou = 0)
        let elements = transformation.normal_equation_elements(&source, &target, 0);
        assert_relative_eq!(elements.misclosure.norm(), 0.0, epsilon = 1e-14);
        assert_relative_eq!(
            (elements.jv_target + DMatrix::<f64>::identity(3, 3)).norm(),
            0.0,
            epsilon = 1e-14
        );
    }

    #[test]
    fn derived_euler_angle_recovers_a_plane_rotation() {
        let mut transformation = spatial();
        let angle: f64 = 0.25;
        // rotation about z: q = (cos(a/2), 0, 0, sin(a/2))
        transformation.parameters_mut()[SPATIAL_QUATERNION[0]].set_value((angle / 2.0).cos());
        transformation.parameters_mut()[SPATIAL_QUATERNION[3]].set_value((angle / 2.0).sin());

        let qxx = DMatrix::<f64>::zeros(0, 0);
        // columns unassigned: gradients propagate to zero cofactors
        let derived = transformation.derived_parameters(&qxx);
        let rz = derived
            .iter()
            .find(|(p, _)| p.parameter_type() == ParameterType::EulerAngleZ)
            .map(|(p, _)| p.value())
            .unwrap();
        assert_relative_eq!(rz, angle, epsilon = 1e-12);
    }
}
