//! # Test statistic strategies
//!
//! This module defines the hypothesis-test configuration
//! [`TestStatisticDefinition`] and the strategies that turn it into
//! concrete critical values:
//!
//! - **Unadjusted**: every test runs at the global significance level α.
//! - **Šidák**: the local level is deflated to `1 - (1-α)^(1/k)` over the
//!   `k` hypotheses of the run, controlling the familywise error rate.
//! - **Baarda B-method**: a single noncentrality λ₀, derived from a
//!   reference degree of freedom, is shared by all tests; the local
//!   quantiles and levels follow from the common power condition.
//!
//! [`TestStatisticParameters`] owns the strategy of one run and caches
//! one [`TestStatisticParameterSet`] per distinct pair of degrees of
//! freedom, so repeated lookups (per pair, per parameter, global test)
//! do not recompute quantiles or noncentrality parameters.

use std::collections::BTreeMap;

use crate::adjust_errors::AdjustmentError;
use crate::constants::{DEFAULT_POWER_OF_TEST, DEFAULT_PROBABILITY_VALUE, SQRT_EPS};
use crate::statistics::distributions::{
    fisher_cdf, fisher_log_sf, fisher_quantile, noncentral_fisher_quantile,
    noncentrality_parameter,
};
use crate::statistics::variance_component::VarianceComponent;

/// Strategy selecting the critical values of the hypothesis tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestStatisticType {
    /// Unadjusted tests at the global significance level.
    None,
    /// Šidák correction of the local significance level.
    Sidak,
    /// Baarda's B-method with a common noncentrality parameter.
    #[default]
    BaardaMethod,
}

/// Configuration of the statistical test engine.
///
/// The probability value α and the power of test 1-β are given in
/// percent, matching the conventional way these levels are reported in
/// geodetic adjustment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestStatisticDefinition {
    pub test_statistic_type: TestStatisticType,
    /// Significance level α in percent.
    pub probability_value: f64,
    /// Power of the test 1-β in percent.
    pub power_of_test: f64,
    /// Refer level and power to the whole family of hypotheses.
    pub familywise_error_rate: bool,
}

impl Default for TestStatisticDefinition {
    fn default() -> Self {
        Self {
            test_statistic_type: TestStatisticType::BaardaMethod,
            probability_value: DEFAULT_PROBABILITY_VALUE,
            power_of_test: DEFAULT_POWER_OF_TEST,
            familywise_error_rate: false,
        }
    }
}

impl TestStatisticDefinition {
    pub fn new(
        test_statistic_type: TestStatisticType,
        probability_value: f64,
        power_of_test: f64,
        familywise_error_rate: bool,
    ) -> Result<Self, AdjustmentError> {
        if !(0.0..100.0).contains(&probability_value) || probability_value <= 0.0 {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "probability value must lie in (0, 100) percent, got {probability_value}"
            )));
        }
        if !(0.0..100.0).contains(&power_of_test) || power_of_test <= 0.0 {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "power of test must lie in (0, 100) percent, got {power_of_test}"
            )));
        }
        Ok(Self {
            test_statistic_type,
            probability_value,
            power_of_test,
            familywise_error_rate,
        })
    }
}

/// Critical values of one test, keyed by its degrees of freedom.
#[derive(Debug, Clone, PartialEq)]
pub struct TestStatisticParameterSet {
    pub numerator_dof: f64,
    pub denominator_dof: f64,
    /// Local significance level actually applied, as a fraction.
    pub probability_value: f64,
    /// Power of the test, as a fraction.
    pub power_of_test: f64,
    pub noncentrality_parameter: f64,
    pub quantile: f64,
    /// `ln` of the local significance level.
    pub log_probability_value: f64,
}

enum Strategy {
    Unadjusted {
        alpha: f64,
        power: f64,
    },
    Sidak {
        alpha_local: f64,
        alpha_global: f64,
        power: f64,
        familywise: bool,
    },
    Baarda {
        lambda0: f64,
        power: f64,
    },
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct DofKey(u64, u64);

impl DofKey {
    fn new(f1: f64, f2: f64) -> Self {
        DofKey(f1.to_bits(), f2.to_bits())
    }
}

/// Per-run table of test-statistic parameter sets.
pub struct TestStatisticParameters {
    strategy: Strategy,
    sets: BTreeMap<DofKey, TestStatisticParameterSet>,
}

impl TestStatisticParameters {
    /// Builds the parameter table of one estimation run.
    ///
    /// Arguments
    /// ---------
    /// * `definition`: test configuration (method, α, 1-β).
    /// * `number_of_hypotheses`: count of local tests plus the global
    ///   one, used by the Šidák correction.
    /// * `reference_dof`: reference degree of freedom of the B-method
    ///   (the test dimension, or the total redundancy when the
    ///   familywise error rate is requested).
    pub fn new(
        definition: &TestStatisticDefinition,
        number_of_hypotheses: usize,
        reference_dof: f64,
    ) -> Result<Self, AdjustmentError> {
        let alpha = definition.probability_value / 100.0;
        let power = definition.power_of_test / 100.0;

        let strategy = match definition.test_statistic_type {
            TestStatisticType::None => Strategy::Unadjusted { alpha, power },
            TestStatisticType::Sidak => {
                let k = number_of_hypotheses.max(1) as f64;
                Strategy::Sidak {
                    alpha_local: 1.0 - (1.0 - alpha).powf(1.0 / k),
                    alpha_global: alpha,
                    power,
                    familywise: definition.familywise_error_rate,
                }
            }
            TestStatisticType::BaardaMethod => {
                let f1 = reference_dof.max(1.0);
                Strategy::Baarda {
                    lambda0: noncentrality_parameter(f1, f64::INFINITY, alpha, power)?,
                    power,
                }
            }
        };

        Ok(Self {
            strategy,
            sets: BTreeMap::new(),
        })
    }

    /// Returns (computing and caching on first use) the parameter set of
    /// a test with `f1` numerator and `f2` denominator degrees of
    /// freedom. A non-positive `f2` is treated as infinite.
    pub fn get(&mut self, f1: f64, f2: f64) -> Result<TestStatisticParameterSet, AdjustmentError> {
        let f2 = if f2 <= 0.0 { f64::INFINITY } else { f2 };
        let key = DofKey::new(f1, f2);
        if let Some(set) = self.sets.get(&key) {
            return Ok(set.clone());
        }

        let set = match &self.strategy {
            Strategy::Unadjusted { alpha, power } => {
                let quantile = fisher_quantile(1.0 - alpha, f1, f2)?;
                TestStatisticParameterSet {
                    numerator_dof: f1,
                    denominator_dof: f2,
                    probability_value: *alpha,
                    power_of_test: *power,
                    noncentrality_parameter: noncentrality_parameter(f1, f2, *alpha, *power)?,
                    quantile,
                    log_probability_value: alpha.ln(),
                }
            }
            Strategy::Sidak {
                alpha_local,
                alpha_global,
                power,
                familywise,
            } => {
                let alpha_ncp = if *familywise {
                    *alpha_local
                } else {
                    *alpha_global
                };
                let quantile = fisher_quantile(1.0 - alpha_local, f1, f2)?;
                TestStatisticParameterSet {
                    numerator_dof: f1,
                    denominator_dof: f2,
                    probability_value: *alpha_local,
                    power_of_test: *power,
                    noncentrality_parameter: noncentrality_parameter(f1, f2, alpha_ncp, *power)?,
                    quantile,
                    log_probability_value: alpha_local.ln(),
                }
            }
            Strategy::Baarda { lambda0, power } => {
                let quantile = noncentral_fisher_quantile(1.0 - power, f1, f2, *lambda0)?;
                let alpha_local = (1.0 - fisher_cdf(quantile, f1, f2)).max(f64::MIN_POSITIVE);
                TestStatisticParameterSet {
                    numerator_dof: f1,
                    denominator_dof: f2,
                    probability_value: alpha_local,
                    power_of_test: *power,
                    noncentrality_parameter: *lambda0,
                    quantile,
                    log_probability_value: alpha_local.ln(),
                }
            }
        };

        self.sets.insert(key, set.clone());
        Ok(set)
    }
}

/// Outcome of the local test of one tested object (position pair,
/// parameter, displacement).
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectTestStatistic {
    /// Quadratic-form numerator of the variance-ratio statistic.
    pub numerator: f64,
    /// Numerator degrees of freedom of the test.
    pub dimension: f64,
    pub test_statistic_apriori: f64,
    pub test_statistic_aposteriori: f64,
    pub quantile_apriori: f64,
    pub quantile_aposteriori: f64,
    /// Logarithmic observed p-value under the a-priori variance.
    pub log_p_value_apriori: f64,
    /// Logarithmic observed p-value under the a-posteriori variance.
    pub log_p_value_aposteriori: f64,
    pub significant: bool,
}

impl ObjectTestStatistic {
    /// Evaluates the a-priori and a-posteriori test statistic of one
    /// object against its critical values.
    ///
    /// The a-posteriori variant uses the bias-corrected variance
    /// `(Ω - T)/(r - f1)` of the remaining adjustment, and is skipped
    /// (reported as zero) when no redundancy is left.
    pub fn evaluate(
        numerator: f64,
        dimension: f64,
        variance_component: &VarianceComponent,
        prio: &TestStatisticParameterSet,
        post: &TestStatisticParameterSet,
    ) -> Self {
        let variance0 = variance_component.variance0();
        let omega = variance_component.omega();
        let redundancy = variance_component.redundancy();

        let t_prio = if dimension > 0.0 && variance0 > 0.0 {
            (numerator / dimension / variance0).abs()
        } else {
            0.0
        };

        let dof_post = redundancy - dimension;
        let t_post = if variance_component.apply_aposteriori_variance() && dof_post > 0.0 {
            let unbiased_variance = (omega - numerator) / dof_post;
            if unbiased_variance > SQRT_EPS && dimension > 0.0 {
                (numerator / dimension / unbiased_variance).abs()
            } else {
                0.0
            }
        } else {
            0.0
        };

        let significant = t_prio > prio.quantile || t_post > post.quantile;

        ObjectTestStatistic {
            numerator,
            dimension,
            test_statistic_apriori: t_prio,
            test_statistic_aposteriori: t_post,
            quantile_apriori: prio.quantile,
            quantile_aposteriori: post.quantile,
            log_p_value_apriori: fisher_log_sf(t_prio, dimension, f64::INFINITY),
            log_p_value_aposteriori: fisher_log_sf(
                t_post,
                dimension,
                if dof_post > 0.0 { dof_post } else { f64::INFINITY },
            ),
            significant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn definition(method: TestStatisticType) -> TestStatisticDefinition {
        TestStatisticDefinition::new(method, 0.1, 80.0, false).unwrap()
    }

    #[test]
    fn parameter_sets_are_cached_per_dof_pair() {
        let mut params =
            TestStatisticParameters::new(&definition(TestStatisticType::None), 10, 1.0).unwrap();
        let a = params.get(1.0, f64::INFINITY).unwrap();
        let b = params.get(1.0, f64::INFINITY).unwrap();
        assert_eq!(a, b);
        assert_eq!(params.sets.len(), 1);

        params.get(3.0, 12.0).unwrap();
        assert_eq!(params.sets.len(), 2);
    }

    #[test]
    fn sidak_level_is_smaller_than_global_level() {
        let mut params =
            TestStatisticParameters::new(&definition(TestStatisticType::Sidak), 20, 1.0).unwrap();
        let set = params.get(1.0, f64::INFINITY).unwrap();
        assert!(set.probability_value < 0.001);
        // deflated level means a larger critical value
        let mut unadjusted =
            TestStatisticParameters::new(&definition(TestStatisticType::None), 20, 1.0).unwrap();
        assert!(set.quantile > unadjusted.get(1.0, f64::INFINITY).unwrap().quantile);
    }

    #[test]
    fn baarda_shares_the_noncentrality_parameter() {
        let mut params =
            TestStatisticParameters::new(&definition(TestStatisticType::BaardaMethod), 10, 1.0)
                .unwrap();
        let one = params.get(1.0, f64::INFINITY).unwrap();
        let three = params.get(3.0, f64::INFINITY).unwrap();
        assert_relative_eq!(
            one.noncentrality_parameter,
            three.noncentrality_parameter,
            epsilon = 1e-12
        );
        // for the reference dof the B-method reduces to the unadjusted test
        let mut unadjusted =
            TestStatisticParameters::new(&definition(TestStatisticType::None), 10, 1.0).unwrap();
        assert_relative_eq!(
            one.quantile,
            unadjusted.get(1.0, f64::INFINITY).unwrap().quantile,
            epsilon = 1e-4
        );
    }

    #[test]
    fn object_test_flags_large_statistic() {
        let mut params =
            TestStatisticParameters::new(&definition(TestStatisticType::None), 2, 1.0).unwrap();
        let prio = params.get(3.0, f64::INFINITY).unwrap();
        let post = params.get(3.0, 17.0).unwrap();

        let mut vc = VarianceComponent::default();
        vc.set_omega(25.0);
        vc.set_redundancy(20.0);

        let quiet = ObjectTestStatistic::evaluate(1.0, 3.0, &vc, &prio, &post);
        assert!(!quiet.significant);
        assert!(quiet.log_p_value_apriori < 0.0);

        let loud = ObjectTestStatistic::evaluate(250.0, 3.0, &vc, &prio, &post);
        assert!(loud.significant);
        assert!(loud.test_statistic_apriori > quiet.test_statistic_apriori);
    }
}
