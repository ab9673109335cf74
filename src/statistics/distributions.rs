//! # Test distributions
//!
//! Central and noncentral variance-ratio distributions used by the test
//! engine. The central chi-squared and Fisher distributions come from
//! [`statrs`]; an infinite denominator degree of freedom selects the
//! chi-squared limit `F(f1, ∞) = χ²(f1)/f1`. The noncentral cumulative
//! distributions are evaluated as Poisson-weighted mixtures of central
//! ones, and the noncentrality parameter of a test with prescribed level
//! and power is recovered by bracketing the mixture and refining the
//! root with Brent's method.

use roots::{find_root_brent, SimpleConvergency};
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor};
use statrs::function::beta::beta_reg;
use statrs::function::gamma::{gamma_lr, gamma_ur, ln_gamma};

use crate::adjust_errors::AdjustmentError;

/// Relative truncation limit of the Poisson mixture series.
const SERIES_EPS: f64 = 1e-14;

fn convergency() -> SimpleConvergency<f64> {
    SimpleConvergency {
        eps: 1e-10,
        max_iter: 200,
    }
}

/// Quantile of the Fisher distribution `F(f1, f2)` at cumulative
/// probability `p`. An infinite `f2` uses the chi-squared limit.
pub fn fisher_quantile(p: f64, f1: f64, f2: f64) -> Result<f64, AdjustmentError> {
    if !(0.0..1.0).contains(&p) || f1 <= 0.0 {
        return Err(AdjustmentError::InvalidDistribution(format!(
            "invalid quantile request, p = {p}, f1 = {f1}, f2 = {f2}"
        )));
    }

    if f2.is_infinite() {
        let chi2 = ChiSquared::new(f1)
            .map_err(|e| AdjustmentError::InvalidDistribution(e.to_string()))?;
        Ok(chi2.inverse_cdf(p) / f1)
    } else {
        let fisher = FisherSnedecor::new(f1, f2)
            .map_err(|e| AdjustmentError::InvalidDistribution(e.to_string()))?;
        Ok(fisher.inverse_cdf(p))
    }
}

/// Cumulative distribution of `F(f1, f2)` at `x`, chi-squared limit for
/// an infinite `f2`.
pub fn fisher_cdf(x: f64, f1: f64, f2: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if f2.is_infinite() {
        gamma_lr(0.5 * f1, 0.5 * f1 * x)
    } else {
        beta_reg(0.5 * f1, 0.5 * f2, f1 * x / (f1 * x + f2))
    }
}

/// Logarithmic upper-tail probability `ln P(F > x)` of `F(f1, f2)`.
///
/// The tail is evaluated directly from the regularized incomplete
/// beta/gamma functions, so small probabilities stay meaningful far
/// beyond the point where `1 - cdf` underflows.
pub fn fisher_log_sf(x: f64, f1: f64, f2: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let sf = if f2.is_infinite() {
        gamma_ur(0.5 * f1, 0.5 * f1 * x)
    } else {
        beta_reg(0.5 * f2, 0.5 * f1, f2 / (f2 + f1 * x))
    };
    sf.max(f64::MIN_POSITIVE).ln()
}

/// Poisson mixture `Σ_j  e^{-λ/2} (λ/2)^j / j! · term(j)`.
///
/// The series is expanded around the mode of the Poisson weights, which
/// keeps it stable for large noncentrality parameters.
fn poisson_mixture<F: Fn(usize) -> f64>(lambda: f64, term: F) -> f64 {
    let half = 0.5 * lambda;
    if half <= 0.0 {
        return term(0);
    }

    let mode = half.floor() as usize;
    let ln_w_mode = -half + mode as f64 * half.ln() - ln_gamma(mode as f64 + 1.0);
    let w_mode = ln_w_mode.exp();

    let mut sum = w_mode * term(mode);

    // upward from the mode
    let mut w = w_mode;
    let mut j = mode;
    loop {
        j += 1;
        w *= half / j as f64;
        let contribution = w * term(j);
        sum += contribution;
        if w < SERIES_EPS || (contribution < SERIES_EPS * sum.abs() && j > mode + 2) {
            break;
        }
    }

    // downward from the mode
    w = w_mode;
    j = mode;
    while j > 0 {
        w *= j as f64 / half;
        j -= 1;
        let contribution = w * term(j);
        sum += contribution;
        if w < SERIES_EPS {
            break;
        }
    }

    sum
}

/// Cumulative distribution of the noncentral chi-squared distribution
/// with `dof` degrees of freedom and noncentrality `lambda` at `x`.
pub fn noncentral_chi_squared_cdf(x: f64, dof: f64, lambda: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    poisson_mixture(lambda, |j| gamma_lr(0.5 * dof + j as f64, 0.5 * x)).clamp(0.0, 1.0)
}

/// Cumulative distribution of the noncentral Fisher distribution
/// `F(f1, f2, λ)` at `x`, chi-squared limit for an infinite `f2`.
pub fn noncentral_fisher_cdf(x: f64, f1: f64, f2: f64, lambda: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if f2.is_infinite() {
        return noncentral_chi_squared_cdf(f1 * x, f1, lambda);
    }
    let u = f1 * x / (f1 * x + f2);
    poisson_mixture(lambda, |j| beta_reg(0.5 * f1 + j as f64, 0.5 * f2, u)).clamp(0.0, 1.0)
}

/// Noncentrality parameter λ of a variance-ratio test with `f1`/`f2`
/// degrees of freedom, level `alpha` and power `power` (both fractions).
///
/// λ solves `P(F(f1, f2, λ) ≤ k) = 1 - power` for the central quantile
/// `k` at probability `1 - alpha`, i.e. the smallest shift of the test
/// statistic that is detected with the prescribed power.
pub fn noncentrality_parameter(
    f1: f64,
    f2: f64,
    alpha: f64,
    power: f64,
) -> Result<f64, AdjustmentError> {
    if !(0.0..1.0).contains(&alpha) || !(0.0..1.0).contains(&power) {
        return Err(AdjustmentError::InvalidDistribution(format!(
            "invalid test parameters, alpha = {alpha}, power = {power}"
        )));
    }

    let quantile = fisher_quantile(1.0 - alpha, f1, f2)?;
    let miss = 1.0 - power;
    let g = |lambda: f64| noncentral_fisher_cdf(quantile, f1, f2, lambda) - miss;

    // the mixture cdf decreases monotonically in lambda
    let mut hi = 1.0;
    while g(hi) > 0.0 {
        hi *= 2.0;
        if hi > 1.0e12 {
            return Err(AdjustmentError::InvalidDistribution(
                "noncentrality parameter out of range".into(),
            ));
        }
    }

    let mut tol = convergency();
    Ok(find_root_brent(0.0, hi, &g, &mut tol)?)
}

/// Quantile of the noncentral Fisher distribution at cumulative
/// probability `p`.
pub fn noncentral_fisher_quantile(
    p: f64,
    f1: f64,
    f2: f64,
    lambda: f64,
) -> Result<f64, AdjustmentError> {
    if !(0.0..1.0).contains(&p) {
        return Err(AdjustmentError::InvalidDistribution(format!(
            "invalid quantile request, p = {p}"
        )));
    }

    let g = |x: f64| noncentral_fisher_cdf(x, f1, f2, lambda) - p;

    let mut hi = fisher_quantile(p.max(0.5), f1, f2)? + lambda + 1.0;
    while g(hi) < 0.0 {
        hi *= 2.0;
        if hi > 1.0e12 {
            return Err(AdjustmentError::InvalidDistribution(
                "noncentral quantile out of range".into(),
            ));
        }
    }

    let mut tol = convergency();
    Ok(find_root_brent(0.0, hi, &g, &mut tol)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn chi_squared_limit_of_fisher_quantile() {
        // chi2 quantiles: P(chi2_1 <= 3.841459) = 0.95, P(chi2_2 <= 5.991465) = 0.95
        let q1 = fisher_quantile(0.95, 1.0, f64::INFINITY).unwrap();
        let q2 = fisher_quantile(0.95, 2.0, f64::INFINITY).unwrap();
        assert_relative_eq!(q1, 3.841459, epsilon = 1e-5);
        assert_relative_eq!(q2, 5.991465 / 2.0, epsilon = 1e-5);
    }

    #[test]
    fn central_case_of_noncentral_cdf() {
        let x = 1.7;
        for f2 in [10.0, f64::INFINITY] {
            let central = fisher_cdf(x, 3.0, f2);
            let mixture = noncentral_fisher_cdf(x, 3.0, f2, 0.0);
            assert_relative_eq!(central, mixture, epsilon = 1e-12);
        }
    }

    #[test]
    fn noncentral_cdf_decreases_with_lambda() {
        let x = 2.5;
        let c0 = noncentral_fisher_cdf(x, 2.0, f64::INFINITY, 1.0);
        let c1 = noncentral_fisher_cdf(x, 2.0, f64::INFINITY, 5.0);
        let c2 = noncentral_fisher_cdf(x, 2.0, f64::INFINITY, 20.0);
        assert!(c0 > c1 && c1 > c2);
    }

    #[test]
    fn baarda_reference_noncentrality() {
        // classical B-method value: alpha = 0.1 %, power 80 %, one dof
        let lambda = noncentrality_parameter(1.0, f64::INFINITY, 0.001, 0.8).unwrap();
        assert_relative_eq!(lambda, 17.07, epsilon = 0.02);
    }

    #[test]
    fn noncentrality_round_trip() {
        let (f1, alpha, power) = (2.0, 0.01, 0.8);
        let lambda = noncentrality_parameter(f1, f64::INFINITY, alpha, power).unwrap();
        let q = noncentral_fisher_quantile(1.0 - power, f1, f64::INFINITY, lambda).unwrap();
        let central = fisher_quantile(1.0 - alpha, f1, f64::INFINITY).unwrap();
        assert_relative_eq!(q, central, epsilon = 1e-6);
    }

    #[test]
    fn log_tail_matches_complement_of_cdf() {
        let (x, f1, f2) = (3.0, 2.0, 12.0);
        let log_sf = fisher_log_sf(x, f1, f2);
        assert_relative_eq!(log_sf.exp(), 1.0 - fisher_cdf(x, f1, f2), epsilon = 1e-10);
    }
}
