//! # Constants and default settings
//!
//! This module centralizes the **numerical constants** and **default
//! settings** used throughout the `geoadjust` library: machine tolerances
//! of the estimation core and the default test-statistic configuration.
//!
//! These definitions are used by all main modules, including the
//! transformation estimator, the statistical test engine and the
//! congruence analysis.

/// Machine epsilon of the numerical core.
pub const EPS: f64 = f64::EPSILON;

/// Convergence limit on the largest absolute parameter increment,
/// `sqrt(EPS)`.
pub const SQRT_EPS: f64 = 1.490_116_119_384_765_6e-8;

/// Default significance level α of the hypothesis tests, in percent.
pub const DEFAULT_PROBABILITY_VALUE: f64 = 0.1;

/// Default power of the hypothesis tests 1-β, in percent.
pub const DEFAULT_POWER_OF_TEST: f64 = 80.0;

/// Default iteration cap of the estimation loop.
pub const DEFAULT_MAXIMAL_NUMBER_OF_ITERATIONS: usize = 5000;

/// Default a-priori variance of unit weight σ₀².
pub const DEFAULT_VARIANCE_OF_UNIT_WEIGHT: f64 = 1.0;
