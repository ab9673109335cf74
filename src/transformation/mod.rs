//! # Coordinate transformation estimation
//!
//! This module defines the transformation models and the configuration
//! struct controlling how the iterative weighted least-squares
//! estimation is run.
//!
//! ## Models
//!
//! - [`TransformationType::Height`]: 1D shift and scale along the
//!   height axis.
//! - [`TransformationType::PlanarAffine`]: 2D shift plus the four
//!   elements of a planar transformation matrix; a similarity model is
//!   obtained by coupling matrix elements via restrictions.
//! - [`TransformationType::SpatialAffine`]: 3D shift, quaternion
//!   rotation and an upper-triangular scale/shear matrix. The unit norm
//!   of the quaternion is carried as a Lagrange restriction of the
//!   normal equation system and enforced exactly after every update.
//!
//! ## Configuration
//!
//! [`TransformationConfig`] centralizes all tunable parameters of one
//! estimation run:
//!
//! - selection of the transformation model,
//! - fixing of individual parameters at expected values,
//! - coupling of parameters (identity restrictions),
//! - center-of-mass reduction of both frames,
//! - iteration cap, Levenberg–Marquardt damping and the
//!   test-statistic method.
//!
//! ## Example
//!
//! ```rust
//! use geoadjust::transformation::{TransformationConfig, TransformationType};
//! use geoadjust::transformation::parameter::ParameterType;
//!
//! // a 3D similarity transformation: one common scale, no shear
//! let config = TransformationConfig::builder(TransformationType::SpatialAffine)
//!     .fix(ParameterType::AuxiliaryElement12, 0.0)
//!     .fix(ParameterType::AuxiliaryElement13, 0.0)
//!     .fix(ParameterType::AuxiliaryElement23, 0.0)
//!     .couple(
//!         ParameterType::AuxiliaryElement11,
//!         ParameterType::AuxiliaryElement22,
//!     )
//!     .couple(
//!         ParameterType::AuxiliaryElement11,
//!         ParameterType::AuxiliaryElement33,
//!     )
//!     .build()
//!     .unwrap();
//! # let _ = config;
//! ```
//!
//! ## See also
//!
//! - [`crate::transformation::adjustment::TransformationAdjustment`]:
//!   the estimation loop consuming this configuration.

pub mod adjustment;
pub mod equations;
pub mod initial_guess;
pub mod parameter;
pub mod pairs;

use nalgebra::DVector;

use crate::adjust_errors::AdjustmentError;
use crate::constants::DEFAULT_MAXIMAL_NUMBER_OF_ITERATIONS;
use crate::statistics::test_statistic::TestStatisticDefinition;

use parameter::{ParameterType, ProcessingType, UnknownParameter};

/// Supported transformation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformationType {
    /// 1D height transformation `z' = t_z + m_z z`.
    Height,
    /// 2D affine transformation.
    PlanarAffine,
    /// 3D quaternion-parameterized affine transformation.
    SpatialAffine,
}

impl TransformationType {
    pub fn dimension(&self) -> usize {
        match self {
            TransformationType::Height => 1,
            TransformationType::PlanarAffine => 2,
            TransformationType::SpatialAffine => 3,
        }
    }
}

/// Constraint equation appended to the normal equation system.
#[derive(Debug, Clone, PartialEq)]
pub enum Restriction {
    /// `q0² + q1² + q2² + q3² - 1 = 0` over the quaternion components.
    QuaternionNorm { indices: [usize; 4] },
    /// `x_a - x_b = 0`, coupling two parameters.
    IdenticalParameters { a: usize, b: usize },
}

/// Parameter set of one estimated transformation model.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformation {
    transformation_type: TransformationType,
    parameters: Vec<UnknownParameter>,
    restrictions: Vec<Restriction>,
    center_of_masses_source: DVector<f64>,
    center_of_masses_target: DVector<f64>,
    estimate_center_of_masses: bool,
}

// parameter order of the spatial model
pub(crate) const SPATIAL_SHIFT: [usize; 3] = [0, 1, 2];
pub(crate) const SPATIAL_QUATERNION: [usize; 4] = [3, 4, 5, 6];
pub(crate) const SPATIAL_SCALE_SHEAR: [usize; 6] = [7, 8, 9, 10, 11, 12];

// parameter order of the planar model
pub(crate) const PLANAR_SHIFT: [usize; 2] = [0, 1];
pub(crate) const PLANAR_MATRIX: [usize; 4] = [2, 3, 4, 5];

// parameter order of the height model
pub(crate) const HEIGHT_SHIFT: usize = 0;
pub(crate) const HEIGHT_SCALE: usize = 1;

impl Transformation {
    fn default_parameters(transformation_type: TransformationType) -> Vec<UnknownParameter> {
        use ParameterType::*;
        use ProcessingType::Adjustment;

        let defaults: &[(ParameterType, f64)] = match transformation_type {
            TransformationType::Height => &[(ShiftZ, 0.0), (ScaleZ, 1.0)],
            TransformationType::PlanarAffine => &[
                (ShiftX, 0.0),
                (ShiftY, 0.0),
                (AuxiliaryElement11, 1.0),
                (AuxiliaryElement12, 0.0),
                (AuxiliaryElement21, 0.0),
                (AuxiliaryElement22, 1.0),
            ],
            TransformationType::SpatialAffine => &[
                (ShiftX, 0.0),
                (ShiftY, 0.0),
                (ShiftZ, 0.0),
                (QuaternionQ0, 1.0),
                (QuaternionQ1, 0.0),
                (QuaternionQ2, 0.0),
                (QuaternionQ3, 0.0),
                (AuxiliaryElement11, 1.0),
                (AuxiliaryElement12, 0.0),
                (AuxiliaryElement13, 0.0),
                (AuxiliaryElement22, 1.0),
                (AuxiliaryElement23, 0.0),
                (AuxiliaryElement33, 1.0),
            ],
        };

        defaults
            .iter()
            .map(|&(parameter_type, value)| {
                UnknownParameter::new(parameter_type, Adjustment, value)
            })
            .collect()
    }

    pub(crate) fn new(config: &TransformationConfig) -> Result<Self, AdjustmentError> {
        let transformation_type = config.transformation_type;
        let dim = transformation_type.dimension();
        let mut parameters = Self::default_parameters(transformation_type);

        for &(parameter_type, value) in &config.fixed {
            let index = parameters
                .iter()
                .position(|p| p.parameter_type() == parameter_type)
                .ok_or_else(|| {
                    AdjustmentError::InvalidConfiguration(format!(
                        "parameter {parameter_type:?} does not exist in a {dim}D model"
                    ))
                })?;
            parameters[index].set_processing_type(ProcessingType::Fixed);
            parameters[index].set_expected_value(value);
            parameters[index].set_value(value);
        }

        let mut restrictions = Vec::new();
        if transformation_type == TransformationType::SpatialAffine {
            restrictions.push(Restriction::QuaternionNorm {
                indices: SPATIAL_QUATERNION,
            });
        }

        for &(type_a, type_b) in &config.identical {
            let find = |t: ParameterType| {
                parameters
                    .iter()
                    .position(|p| p.parameter_type() == t)
                    .ok_or_else(|| {
                        AdjustmentError::InvalidConfiguration(format!(
                            "parameter {t:?} does not exist in a {dim}D model"
                        ))
                    })
            };
            let a = find(type_a)?;
            let b = find(type_b)?;
            if a == b {
                return Err(AdjustmentError::InvalidConfiguration(format!(
                    "cannot couple {type_a:?} with itself"
                )));
            }
            if parameters[a].processing_type() != ProcessingType::Adjustment
                || parameters[b].processing_type() != ProcessingType::Adjustment
            {
                return Err(AdjustmentError::InvalidConfiguration(format!(
                    "coupled parameters {type_a:?}/{type_b:?} must both be estimated"
                )));
            }
            restrictions.push(Restriction::IdenticalParameters { a, b });
        }

        Ok(Self {
            transformation_type,
            parameters,
            restrictions,
            center_of_masses_source: DVector::zeros(dim),
            center_of_masses_target: DVector::zeros(dim),
            estimate_center_of_masses: config.estimate_center_of_masses,
        })
    }

    pub fn transformation_type(&self) -> TransformationType {
        self.transformation_type
    }

    pub fn dimension(&self) -> usize {
        self.transformation_type.dimension()
    }

    pub fn parameters(&self) -> &[UnknownParameter] {
        &self.parameters
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut [UnknownParameter] {
        &mut self.parameters
    }

    pub fn restrictions(&self) -> &[Restriction] {
        &self.restrictions
    }

    pub(crate) fn estimate_center_of_masses(&self) -> bool {
        self.estimate_center_of_masses
    }

    pub(crate) fn center_of_masses(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.center_of_masses_source, &self.center_of_masses_target)
    }

    pub(crate) fn set_center_of_masses(&mut self, source: DVector<f64>, target: DVector<f64>) {
        self.center_of_masses_source = source;
        self.center_of_masses_target = target;
    }

    pub(crate) fn reset_center_of_masses(&mut self) {
        self.center_of_masses_source.fill(0.0);
        self.center_of_masses_target.fill(0.0);
    }

    pub(crate) fn value(&self, index: usize) -> f64 {
        self.parameters[index].value()
    }

    /// Misclosure of a restriction at the current parameter values.
    pub(crate) fn restriction_misclosure(&self, restriction: &Restriction) -> f64 {
        match restriction {
            Restriction::QuaternionNorm { indices } => {
                indices.iter().map(|&i| self.value(i).powi(2)).sum::<f64>() - 1.0
            }
            Restriction::IdenticalParameters { a, b } => self.value(*a) - self.value(*b),
        }
    }

    /// Non-zero Jacobian entries of a restriction, `(parameter index,
    /// coefficient)`.
    pub(crate) fn restriction_jacobian(&self, restriction: &Restriction) -> Vec<(usize, f64)> {
        match restriction {
            Restriction::QuaternionNorm { indices } => indices
                .iter()
                .map(|&i| (i, 2.0 * self.value(i)))
                .collect(),
            Restriction::IdenticalParameters { a, b } => vec![(*a, 1.0), (*b, -1.0)],
        }
    }

    /// Scales the quaternion components back onto the unit sphere.
    pub(crate) fn normalize_quaternion(&mut self) {
        if self.transformation_type != TransformationType::SpatialAffine {
            return;
        }
        let norm = SPATIAL_QUATERNION
            .iter()
            .map(|&i| self.value(i).powi(2))
            .sum::<f64>()
            .sqrt();
        if norm > 0.0 {
            for &i in &SPATIAL_QUATERNION {
                let value = self.parameters[i].value() / norm;
                self.parameters[i].set_value(value);
            }
        }
    }
}

/// Configuration of one transformation estimation run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformationConfig {
    pub transformation_type: TransformationType,
    fixed: Vec<(ParameterType, f64)>,
    identical: Vec<(ParameterType, ParameterType)>,
    pub estimate_center_of_masses: bool,
    pub maximal_number_of_iterations: usize,
    /// Initial Levenberg–Marquardt damping value, zero disables damping.
    pub damping_value: f64,
    pub test_statistic: TestStatisticDefinition,
    /// Scale uncertainties by the a-posteriori variance of unit weight.
    pub apply_aposteriori_variance: bool,
}

impl TransformationConfig {
    pub fn builder(transformation_type: TransformationType) -> TransformationConfigBuilder {
        TransformationConfigBuilder {
            config: TransformationConfig {
                transformation_type,
                fixed: Vec::new(),
                identical: Vec::new(),
                estimate_center_of_masses: true,
                maximal_number_of_iterations: DEFAULT_MAXIMAL_NUMBER_OF_ITERATIONS,
                damping_value: 0.0,
                test_statistic: TestStatisticDefinition::default(),
                apply_aposteriori_variance: true,
            },
        }
    }
}

/// Builder of a [`TransformationConfig`].
pub struct TransformationConfigBuilder {
    config: TransformationConfig,
}

impl TransformationConfigBuilder {
    /// Holds a parameter fixed at `value`, removing it from the normal
    /// equations.
    pub fn fix(mut self, parameter_type: ParameterType, value: f64) -> Self {
        self.config.fixed.push((parameter_type, value));
        self
    }

    /// Couples two parameters by an identity restriction.
    pub fn couple(mut self, a: ParameterType, b: ParameterType) -> Self {
        self.config.identical.push((a, b));
        self
    }

    pub fn estimate_center_of_masses(mut self, estimate: bool) -> Self {
        self.config.estimate_center_of_masses = estimate;
        self
    }

    pub fn maximal_number_of_iterations(mut self, iterations: usize) -> Self {
        self.config.maximal_number_of_iterations = iterations;
        self
    }

    pub fn damping_value(mut self, damping_value: f64) -> Self {
        self.config.damping_value = damping_value.abs();
        self
    }

    pub fn test_statistic(mut self, definition: TestStatisticDefinition) -> Self {
        self.config.test_statistic = definition;
        self
    }

    pub fn apply_aposteriori_variance(mut self, apply: bool) -> Self {
        self.config.apply_aposteriori_variance = apply;
        self
    }

    /// Validates the configuration against the chosen model.
    pub fn build(self) -> Result<TransformationConfig, AdjustmentError> {
        // the transformation constructor performs the model-dependent checks
        Transformation::new(&self.config)?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixing_a_foreign_parameter_is_rejected() {
        let result = TransformationConfig::builder(TransformationType::Height)
            .fix(ParameterType::ShearX, 0.0)
            .build();
        assert!(matches!(
            result,
            Err(AdjustmentError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn spatial_model_carries_the_norm_restriction() {
        let config = TransformationConfig::builder(TransformationType::SpatialAffine)
            .build()
            .unwrap();
        let transformation = Transformation::new(&config).unwrap();
        assert_eq!(transformation.restrictions().len(), 1);
        assert_eq!(transformation.parameters().len(), 13);
    }

    #[test]
    fn quaternion_normalization_restores_unit_norm() {
        let config = TransformationConfig::builder(TransformationType::SpatialAffine)
            .build()
            .unwrap();
        let mut transformation = Transformation::new(&config).unwrap();
        transformation.parameters_mut()[SPATIAL_QUATERNION[0]].set_value(2.0);
        transformation.parameters_mut()[SPATIAL_QUATERNION[2]].set_value(1.0);
        transformation.normalize_quaternion();

        let norm: f64 = SPATIAL_QUATERNION
            .iter()
            .map(|&i| transformation.value(i).powi(2))
            .sum();
        approx::assert_relative_eq!(norm, 1.0, epsilon = 1e-14);
    }

    #[test]
    fn coupling_a_fixed_parameter_is_rejected() {
        let result = TransformationConfig::builder(TransformationType::PlanarAffine)
            .fix(ParameterType::AuxiliaryElement22, 1.0)
            .couple(
                ParameterType::AuxiliaryElement11,
                ParameterType::AuxiliaryElement22,
            )
            .build();
        assert!(result.is_err());
    }
}
