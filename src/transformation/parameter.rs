//! Unknown parameters of an estimated model.

use crate::statistics::test_statistic::ObjectTestStatistic;

/// Numeric meaning of a parameter, decoupled from any display concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCategory {
    Length,
    Angle,
    Scale,
    Dimensionless,
}

/// Kind of an unknown parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    ShiftX,
    ShiftY,
    ShiftZ,
    QuaternionQ0,
    QuaternionQ1,
    QuaternionQ2,
    QuaternionQ3,
    /// Elements of the scale/shear or planar transformation matrix.
    AuxiliaryElement11,
    AuxiliaryElement12,
    AuxiliaryElement13,
    AuxiliaryElement21,
    AuxiliaryElement22,
    AuxiliaryElement23,
    AuxiliaryElement33,
    ScaleX,
    ScaleY,
    ScaleZ,
    ShearX,
    ShearY,
    ShearZ,
    EulerAngleX,
    EulerAngleY,
    EulerAngleZ,
    /// Orientation unknown of a direction set.
    Orientation,
    StrainTranslationX,
    StrainTranslationY,
    StrainTranslationZ,
    StrainXX,
    StrainXY,
    StrainXZ,
    StrainYY,
    StrainYZ,
    StrainZZ,
    StrainRotationX,
    StrainRotationY,
    StrainRotationZ,
}

impl ParameterType {
    pub fn unit_category(&self) -> UnitCategory {
        use ParameterType::*;
        match self {
            ShiftX | ShiftY | ShiftZ | StrainTranslationX | StrainTranslationY
            | StrainTranslationZ => UnitCategory::Length,
            ShearX | ShearY | ShearZ | EulerAngleX | EulerAngleY | EulerAngleZ | Orientation
            | StrainRotationX | StrainRotationY | StrainRotationZ => UnitCategory::Angle,
            ScaleX | ScaleY | ScaleZ => UnitCategory::Scale,
            _ => UnitCategory::Dimensionless,
        }
    }
}

/// How a parameter takes part in the estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingType {
    /// Estimated within the iterative adjustment.
    Adjustment,
    /// Held at its expected value, excluded from the normal equations.
    Fixed,
    /// Derived from the adjusted parameters after convergence.
    PostProcessing,
}

/// One unknown parameter of a transformation or strain model.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownParameter {
    parameter_type: ParameterType,
    processing_type: ProcessingType,
    value: f64,
    expected_value: f64,
    column: i32,
    uncertainty: f64,
    test_statistic: Option<ObjectTestStatistic>,
}

impl UnknownParameter {
    pub fn new(
        parameter_type: ParameterType,
        processing_type: ProcessingType,
        expected_value: f64,
    ) -> Self {
        Self {
            parameter_type,
            processing_type,
            value: expected_value,
            expected_value,
            column: -1,
            uncertainty: 0.0,
            test_statistic: None,
        }
    }

    pub fn parameter_type(&self) -> ParameterType {
        self.parameter_type
    }

    pub fn processing_type(&self) -> ProcessingType {
        self.processing_type
    }

    pub(crate) fn set_processing_type(&mut self, processing_type: ProcessingType) {
        self.processing_type = processing_type;
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub(crate) fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    /// Expected (null hypothesis) value of the parameter.
    pub fn expected_value(&self) -> f64 {
        self.expected_value
    }

    pub(crate) fn set_expected_value(&mut self, expected_value: f64) {
        self.expected_value = expected_value;
    }

    /// Column of the parameter in the Jacobian, `-1` when not estimated.
    pub(crate) fn column(&self) -> i32 {
        self.column
    }

    pub(crate) fn set_column(&mut self, column: i32) {
        self.column = column;
    }

    pub fn uncertainty(&self) -> f64 {
        self.uncertainty
    }

    pub(crate) fn set_uncertainty(&mut self, uncertainty: f64) {
        self.uncertainty = uncertainty;
    }

    pub fn test_statistic(&self) -> Option<&ObjectTestStatistic> {
        self.test_statistic.as_ref()
    }

    pub(crate) fn set_test_statistic(&mut self, test_statistic: ObjectTestStatistic) {
        self.test_statistic = Some(test_statistic);
    }

    pub fn is_significant(&self) -> bool {
        self.test_statistic
            .as_ref()
            .map(|t| t.significant)
            .unwrap_or(false)
    }
}
