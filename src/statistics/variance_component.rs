//! Variance components of unit weight, per observation-group kind and
//! for the whole adjustment, with the global variance-ratio test.

use crate::adjust_errors::AdjustmentError;
use crate::constants::{DEFAULT_VARIANCE_OF_UNIT_WEIGHT, SQRT_EPS};
use crate::statistics::test_statistic::TestStatisticParameters;

/// Kind of observations contributing to a variance component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VarianceComponentType {
    /// All observations of the adjustment.
    #[default]
    Global,
    Leveling,
    Direction,
    HorizontalDistance,
    SlopeDistance,
    ZenithAngle,
    GnssBaseline1D,
    GnssBaseline2D,
    GnssBaseline3D,
}

/// Estimated variance of unit weight of one observation kind.
///
/// Carries the weighted sum of squared residuals Ω and the accumulated
/// redundancy r; the a-posteriori variance is Ω/r whenever both are
/// positive, and falls back to the a-priori σ₀² otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceComponent {
    variance_component_type: VarianceComponentType,
    variance0: f64,
    omega: f64,
    redundancy: f64,
    number_of_observations: usize,
    apply_aposteriori_variance: bool,
    significant: bool,
}

impl Default for VarianceComponent {
    fn default() -> Self {
        Self::new(VarianceComponentType::Global)
    }
}

impl VarianceComponent {
    pub fn new(variance_component_type: VarianceComponentType) -> Self {
        Self {
            variance_component_type,
            variance0: DEFAULT_VARIANCE_OF_UNIT_WEIGHT,
            omega: 0.0,
            redundancy: 0.0,
            number_of_observations: 0,
            apply_aposteriori_variance: true,
            significant: false,
        }
    }

    pub fn variance_component_type(&self) -> VarianceComponentType {
        self.variance_component_type
    }

    pub fn variance0(&self) -> f64 {
        self.variance0
    }

    pub fn set_variance0(&mut self, variance0: f64) {
        self.variance0 = if variance0 > SQRT_EPS {
            variance0
        } else {
            SQRT_EPS
        };
    }

    pub fn omega(&self) -> f64 {
        self.omega
    }

    pub fn set_omega(&mut self, omega: f64) {
        self.omega = omega;
    }

    pub fn add_omega(&mut self, omega: f64) {
        self.omega += omega;
    }

    pub fn redundancy(&self) -> f64 {
        self.redundancy
    }

    pub fn set_redundancy(&mut self, redundancy: f64) {
        self.redundancy = redundancy;
    }

    pub fn add_redundancy(&mut self, redundancy: f64) {
        self.redundancy += redundancy;
    }

    pub fn number_of_observations(&self) -> usize {
        self.number_of_observations
    }

    pub fn set_number_of_observations(&mut self, number_of_observations: usize) {
        self.number_of_observations = number_of_observations;
    }

    pub fn apply_aposteriori_variance(&self) -> bool {
        self.apply_aposteriori_variance
    }

    pub fn set_apply_aposteriori_variance(&mut self, apply: bool) {
        self.apply_aposteriori_variance = apply;
    }

    /// A-posteriori variance of unit weight `Ω/r`, or σ₀² when the
    /// component carries no redundancy.
    pub fn variance(&self) -> f64 {
        if self.omega > 0.0 && self.redundancy > 0.0 {
            self.omega / self.redundancy
        } else {
            self.variance0
        }
    }

    pub fn is_significant(&self) -> bool {
        self.significant
    }

    /// Global variance-ratio test of this component.
    ///
    /// The component is significant when the variance ratio exceeds the
    /// quantile of `F(r, ∞)` at the configured level; the comparison is
    /// guarded by `1 + sqrt(EPS)` so a ratio of one never triggers.
    pub fn test(
        &mut self,
        test_statistic_parameters: &mut TestStatisticParameters,
    ) -> Result<(), AdjustmentError> {
        self.significant = false;
        if self.redundancy > 0.0 {
            let set = test_statistic_parameters.get(self.redundancy, f64::INFINITY)?;
            let quantile = set.quantile.max(1.0 + SQRT_EPS);
            self.significant = self.variance() / self.variance0 > quantile;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::test_statistic::{TestStatisticDefinition, TestStatisticType};
    use approx::assert_relative_eq;

    #[test]
    fn variance_falls_back_to_apriori() {
        let vc = VarianceComponent::default();
        assert_relative_eq!(vc.variance(), vc.variance0(), epsilon = 1e-12);
    }

    #[test]
    fn global_test_decision() {
        let definition =
            TestStatisticDefinition::new(TestStatisticType::None, 5.0, 80.0, false).unwrap();
        let mut params = TestStatisticParameters::new(&definition, 1, 1.0).unwrap();

        let mut vc = VarianceComponent::default();
        vc.set_redundancy(10.0);
        vc.set_omega(11.0);
        vc.test(&mut params).unwrap();
        assert!(!vc.is_significant());

        vc.set_omega(100.0);
        vc.test(&mut params).unwrap();
        assert!(vc.is_significant());
    }
}
