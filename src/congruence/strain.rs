//! Strain analysis of a displacement field.
//!
//! The displacements of a congruence group are fitted by the affine
//! field `d = t + E·(x - x̄)`. The symmetric part of `E` holds the
//! strain components, the antisymmetric part the differential
//! rotations. Every derived parameter carries its uncertainty and a
//! significance test against zero.

use nalgebra::{DMatrix, DVector};

use crate::adjust_errors::AdjustmentError;
use crate::constants::SQRT_EPS;
use crate::linalg::solve_symmetric_system;
use crate::statistics::test_statistic::{ObjectTestStatistic, TestStatisticParameters};
use crate::statistics::variance_component::VarianceComponent;
use crate::transformation::parameter::{ParameterType, ProcessingType, UnknownParameter};

use super::CongruenceAnalysisPointPair;

/// Translation parameter types per dimension.
fn translation_types(dimension: usize) -> &'static [ParameterType] {
    match dimension {
        1 => &[ParameterType::StrainTranslationZ],
        2 => &[
            ParameterType::StrainTranslationX,
            ParameterType::StrainTranslationY,
        ],
        _ => &[
            ParameterType::StrainTranslationX,
            ParameterType::StrainTranslationY,
            ParameterType::StrainTranslationZ,
        ],
    }
}

/// Symmetric strain components `(type, row, column)` per dimension.
fn strain_types(dimension: usize) -> &'static [(ParameterType, usize, usize)] {
    match dimension {
        1 => &[(ParameterType::StrainZZ, 0, 0)],
        2 => &[
            (ParameterType::StrainXX, 0, 0),
            (ParameterType::StrainXY, 0, 1),
            (ParameterType::StrainYY, 1, 1),
        ],
        _ => &[
            (ParameterType::StrainXX, 0, 0),
            (ParameterType::StrainXY, 0, 1),
            (ParameterType::StrainXZ, 0, 2),
            (ParameterType::StrainYY, 1, 1),
            (ParameterType::StrainYZ, 1, 2),
            (ParameterType::StrainZZ, 2, 2),
        ],
    }
}

/// Differential rotations `(type, row, column)`, read from the
/// antisymmetric part `0.5 (E[r][c] - E[c][r])`.
fn rotation_types(dimension: usize) -> &'static [(ParameterType, usize, usize)] {
    match dimension {
        2 => &[(ParameterType::StrainRotationZ, 1, 0)],
        3 => &[
            (ParameterType::StrainRotationX, 2, 1),
            (ParameterType::StrainRotationY, 0, 2),
            (ParameterType::StrainRotationZ, 1, 0),
        ],
        _ => &[],
    }
}

/// Fits the affine displacement field over the enabled pairs of a
/// group and derives the tested strain parameters.
pub fn estimate_strain_parameters(
    pairs: &[CongruenceAnalysisPointPair],
    dimension: usize,
    variance_component: &VarianceComponent,
    test_statistics: &mut TestStatisticParameters,
) -> Result<Vec<UnknownParameter>, AdjustmentError> {
    let enabled: Vec<&CongruenceAnalysisPointPair> = pairs
        .iter()
        .filter(|p| p.is_enabled() && p.is_complete())
        .collect();

    let nou = dimension + dimension * dimension;
    let noe = dimension * enabled.len();
    if noe < nou {
        return Err(AdjustmentError::SingularSystem(format!(
            "{} point pairs cannot determine the {dimension}D strain field",
            enabled.len()
        )));
    }

    // centroid of the reference epoch
    let mut centroid = DVector::<f64>::zeros(dimension);
    for pair in &enabled {
        centroid += pair.reference().coordinates();
    }
    centroid /= enabled.len() as f64;

    // design: d_i = t + E (x_i - centroid), row-major columns of E
    let mut n_matrix = DMatrix::<f64>::zeros(nou, nou);
    let mut n_vector = DVector::<f64>::zeros(nou);
    let mut observations = Vec::with_capacity(enabled.len());
    for pair in &enabled {
        let x = pair.reference().coordinates() - &centroid;
        let d = pair.control().coordinates() - pair.reference().coordinates();
        let mut a = DMatrix::<f64>::zeros(dimension, nou);
        for r in 0..dimension {
            a[(r, r)] = 1.0;
            for c in 0..dimension {
                a[(r, dimension + r * dimension + c)] = x[c];
            }
        }
        n_matrix += a.transpose() * &a;
        n_vector += a.transpose() * &d;
        observations.push((a, d));
    }

    let solution = solve_symmetric_system(&n_matrix, &n_vector, true)?;
    let qxx = solution.inverse.ok_or_else(|| {
        AdjustmentError::SingularSystem("strain normal equations could not be inverted".into())
    })?;
    let estimate = solution.x;

    let dof = (noe - nou) as f64;
    let mut omega = 0.0;
    for (a, d) in &observations {
        let residual = a * &estimate - d;
        omega += residual.norm_squared();
    }

    // local variance component of the fit, in the global a-priori scale
    let mut local = VarianceComponent::new(variance_component.variance_component_type());
    local.set_variance0(variance_component.variance0());
    local.set_apply_aposteriori_variance(variance_component.apply_aposteriori_variance());
    local.set_omega(omega);
    local.set_redundancy(dof);
    local.set_number_of_observations(noe);

    let applied_variance = if local.apply_aposteriori_variance() && dof > 0.0 {
        local.variance()
    } else {
        local.variance0()
    };
    let prio = test_statistics.get(1.0, f64::INFINITY)?;
    let post = test_statistics.get(1.0, dof - 1.0)?;

    let mut parameters = Vec::new();
    let mut push = |parameter_type, value: f64, cofactor: f64| {
        let mut parameter =
            UnknownParameter::new(parameter_type, ProcessingType::PostProcessing, 0.0);
        parameter.set_value(value);
        parameter.set_uncertainty((applied_variance * cofactor.abs()).sqrt());
        if cofactor > SQRT_EPS {
            let statistic = ObjectTestStatistic::evaluate(
                value * value / cofactor,
                1.0,
                &local,
                &prio,
                &post,
            );
            parameter.set_test_statistic(statistic);
        }
        parameters.push(parameter);
    };

    for (i, &parameter_type) in translation_types(dimension).iter().enumerate() {
        push(parameter_type, estimate[i], qxx[(i, i)].max(0.0));
    }

    let e_index = |r: usize, c: usize| dimension + r * dimension + c;
    for &(parameter_type, r, c) in strain_types(dimension) {
        let (value, cofactor) = if r == c {
            (estimate[e_index(r, c)], qxx[(e_index(r, c), e_index(r, c))])
        } else {
            let (i, j) = (e_index(r, c), e_index(c, r));
            (
                0.5 * (estimate[i] + estimate[j]),
                0.25 * (qxx[(i, i)] + qxx[(j, j)] + 2.0 * qxx[(i, j)]),
            )
        };
        push(parameter_type, value, cofactor.max(0.0));
    }

    for &(parameter_type, r, c) in rotation_types(dimension) {
        let (i, j) = (e_index(r, c), e_index(c, r));
        let value = 0.5 * (estimate[i] - estimate[j]);
        let cofactor = 0.25 * (qxx[(i, i)] + qxx[(j, j)] - 2.0 * qxx[(i, j)]);
        push(parameter_type, value, cofactor.max(0.0));
    }

    Ok(parameters)
}
