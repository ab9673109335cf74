//! Iterative least-squares estimation of a transformation model.
//!
//! The unknown parameters are estimated in a Gauss-Helmert model: every
//! homologous pair contributes one misclosure vector, weighted by the
//! combined dispersion of its source and target positions. Restrictions
//! (quaternion norm, coupled parameters) are bordered onto the normal
//! equation system as Lagrange conditions. After convergence a complete
//! pass inverts the normal equations and derives the stochastic
//! quantities: redundancy numbers, gross errors, minimal detectable
//! biases and the hypothesis tests of pairs and parameters.

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::adjust_errors::AdjustmentError;
use crate::constants::{EPS, SQRT_EPS};
use crate::linalg::{invert_dispersion, pseudo_inverse, solve_symmetric_system};
use crate::statistics::test_statistic::{
    ObjectTestStatistic, TestStatisticDefinition, TestStatisticParameters,
};
use crate::statistics::variance_component::{VarianceComponent, VarianceComponentType};
use crate::transformation::initial_guess::center_of_masses;
use crate::transformation::pairs::{FramePositionPair, HomologousFramePositionPair};
use crate::transformation::parameter::{ParameterType, ProcessingType, UnknownParameter};
use crate::transformation::{Transformation, TransformationConfig};

/// Per-pair scratch of one iteration.
struct PairEquations {
    index: usize,
    jx: DMatrix<f64>,
    jv_source: DMatrix<f64>,
    jv_target: DMatrix<f64>,
    /// Misclosure corrected by the residuals of the previous iteration.
    misclosure: DVector<f64>,
    /// Weight of the misclosure, the inverse of its dispersion.
    weight: DMatrix<f64>,
}

/// Assembled normal equation system of one iteration.
struct NormalEquationSystem {
    n_matrix: DMatrix<f64>,
    n_vector: DVector<f64>,
    max_abs_restriction: f64,
    equations: Vec<PairEquations>,
}

/// Estimator of a coordinate transformation between two frames.
///
/// ```no_run
/// use geoadjust::transformation::adjustment::TransformationAdjustment;
/// use geoadjust::transformation::{TransformationConfig, TransformationType};
/// # fn pairs() -> Vec<geoadjust::transformation::pairs::HomologousFramePositionPair> { vec![] }
///
/// let config = TransformationConfig::builder(TransformationType::SpatialAffine)
///     .build()?;
/// let mut adjustment = TransformationAdjustment::new(config)?;
/// let mut pairs = pairs();
/// adjustment.estimate(&mut pairs)?;
/// for parameter in adjustment.transformation().parameters() {
///     println!("{:?} = {}", parameter.parameter_type(), parameter.value());
/// }
/// # Ok::<(), geoadjust::adjust_errors::AdjustmentError>(())
/// ```
pub struct TransformationAdjustment {
    config: TransformationConfig,
    transformation: Transformation,
    derived_parameters: Vec<UnknownParameter>,
    variance_component: VarianceComponent,
    cofactor_matrix: Option<DMatrix<f64>>,
    degree_of_freedom: f64,
    number_of_observations: usize,
    number_of_unknowns: usize,
}

impl TransformationAdjustment {
    pub fn new(config: TransformationConfig) -> Result<Self, AdjustmentError> {
        let transformation = Transformation::new(&config)?;
        let mut variance_component = VarianceComponent::new(VarianceComponentType::Global);
        variance_component.set_apply_aposteriori_variance(config.apply_aposteriori_variance);
        Ok(Self {
            config,
            transformation,
            derived_parameters: Vec::new(),
            variance_component,
            cofactor_matrix: None,
            degree_of_freedom: 0.0,
            number_of_observations: 0,
            number_of_unknowns: 0,
        })
    }

    pub fn transformation(&self) -> &Transformation {
        &self.transformation
    }

    /// Parameters derived after the adjustment (Euler angles, scales,
    /// shear angles), empty before [`estimate`](Self::estimate) ran.
    pub fn derived_parameters(&self) -> &[UnknownParameter] {
        &self.derived_parameters
    }

    pub fn variance_component_of_unit_weight(&self) -> &VarianceComponent {
        &self.variance_component
    }

    pub fn degree_of_freedom(&self) -> f64 {
        self.degree_of_freedom
    }

    pub fn number_of_observations(&self) -> usize {
        self.number_of_observations
    }

    pub fn number_of_unknowns(&self) -> usize {
        self.number_of_unknowns
    }

    /// Cofactor matrix of the estimated parameters.
    pub fn cofactor_matrix(&self) -> Option<&DMatrix<f64>> {
        self.cofactor_matrix.as_ref()
    }

    /// Dispersion of the estimated parameters, the cofactor matrix
    /// scaled by the applied variance of unit weight.
    pub fn dispersion_matrix(&self) -> Option<DMatrix<f64>> {
        self.cofactor_matrix
            .as_ref()
            .map(|qxx| qxx * self.applied_variance())
    }

    /// Correlation matrix of the estimated parameters.
    pub fn correlation_matrix(&self) -> Option<DMatrix<f64>> {
        self.cofactor_matrix.as_ref().map(|qxx| {
            let n = qxx.nrows();
            DMatrix::from_fn(n, n, |i, j| {
                let denominator = (qxx[(i, i)] * qxx[(j, j)]).sqrt();
                if denominator > 0.0 {
                    qxx[(i, j)] / denominator
                } else if i == j {
                    1.0
                } else {
                    0.0
                }
            })
        })
    }

    fn applied_variance(&self) -> f64 {
        if self.config.apply_aposteriori_variance && self.degree_of_freedom > 0.0 {
            self.variance_component.variance()
        } else {
            self.variance_component.variance0()
        }
    }

    /// Average diagonal element of the a-priori dispersions of the
    /// enabled pairs, the a-priori variance of unit weight.
    fn estimate_variance_of_unit_weight_apriori(
        pairs: &[HomologousFramePositionPair],
    ) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for pair in pairs.iter().filter(|p| p.is_enabled()) {
            for position in [pair.source().position(), pair.target().position()] {
                let d = position.dispersion_apriori();
                for i in 0..d.nrows() {
                    sum += d[(i, i)];
                    count += 1;
                }
            }
        }
        if count > 0 {
            (sum / count as f64).max(SQRT_EPS)
        } else {
            SQRT_EPS
        }
    }

    /// Runs the iterative adjustment over the homologous pairs.
    ///
    /// On [`AdjustmentError::NonConvergence`] the state of the pairs and
    /// the parameters is undefined.
    pub fn estimate(
        &mut self,
        pairs: &mut [HomologousFramePositionPair],
    ) -> Result<(), AdjustmentError> {
        self.transformation = Transformation::new(&self.config)?;
        self.derived_parameters.clear();
        self.cofactor_matrix = None;
        self.variance_component = VarianceComponent::new(VarianceComponentType::Global);
        self.variance_component
            .set_apply_aposteriori_variance(self.config.apply_aposteriori_variance);
        for pair in pairs.iter_mut() {
            pair.reset();
        }

        let dim = self.transformation.dimension();
        for pair in pairs.iter().filter(|p| p.is_enabled()) {
            if !pair.is_complete() {
                return Err(AdjustmentError::IncompleteRecord(format!(
                    "position pair {} is incomplete",
                    pair.name()
                )));
            }
            if pair.dimension() != dim {
                return Err(AdjustmentError::InvalidConfiguration(format!(
                    "position pair {} has dimension {}, the model expects {dim}",
                    pair.name(),
                    pair.dimension()
                )));
            }
        }

        // column assignment of the estimated parameters
        let mut nou = 0usize;
        for parameter in self.transformation.parameters_mut() {
            if parameter.processing_type() == ProcessingType::Adjustment {
                parameter.set_column(nou as i32);
                nou += 1;
            } else {
                parameter.set_column(-1);
            }
        }
        let nor = self.transformation.restrictions().len();
        let number_of_pairs = pairs.iter().filter(|p| p.is_enabled()).count();
        let noe = dim * number_of_pairs;
        if noe + nor < nou {
            return Err(AdjustmentError::SingularSystem(format!(
                "{noe} condition equations cannot determine {nou} parameters \
                 under {nor} restrictions"
            )));
        }

        let dof = (noe + nor) as f64 - nou as f64;
        debug!(
            "estimating {nou} parameters from {noe} condition equations \
             and {nor} restrictions, degree of freedom {dof}"
        );
        self.degree_of_freedom = dof;
        self.number_of_observations = noe;
        self.number_of_unknowns = nou;

        let variance0 = Self::estimate_variance_of_unit_weight_apriori(pairs);
        self.variance_component.set_variance0(variance0);
        self.variance_component.set_number_of_observations(noe);

        if self.transformation.estimate_center_of_masses() {
            let (com_source, com_target) = center_of_masses(pairs, dim);
            self.transformation
                .set_center_of_masses(com_source, com_target);
        } else {
            self.transformation.reset_center_of_masses();
        }
        self.transformation.apply_initial_guess(pairs);

        let maximal_iterations = self.config.maximal_number_of_iterations.max(1);
        let mut runs = maximal_iterations as i64 - 1;
        let mut adapted_damping = self.config.damping_value;
        let mut previous_omega = f64::INFINITY;
        let mut is_estimated = false;
        let mut is_first_iteration = true;
        let mut last_valid_max_abs_dx = f64::INFINITY;
        let mut omega = 0.0;

        loop {
            let estimate_complete_model = is_estimated;
            if adapted_damping > 0.0
                && (estimate_complete_model
                    || adapted_damping <= SQRT_EPS
                    || (runs as f64) < maximal_iterations as f64 * 0.1 + 1.0)
            {
                adapted_damping = 0.0;
            }

            let system = self.build_normal_equations(pairs, nou, nor, adapted_damping, variance0)?;
            let solution = solve_symmetric_system(
                &system.n_matrix,
                &system.n_vector,
                estimate_complete_model,
            )?;
            let mut dx = DVector::from_iterator(nou, solution.x.iter().take(nou).copied());
            if estimate_complete_model {
                let inverse = solution.inverse.ok_or_else(|| {
                    AdjustmentError::SingularSystem(
                        "normal equation system could not be inverted".to_string(),
                    )
                })?;
                self.cofactor_matrix = Some(inverse.view((0, 0), (nou, nou)).into_owned());
            }

            let mut max_abs_dx = dx.iter().fold(0.0f64, |m, v| m.max(v.abs()));
            if !max_abs_dx.is_finite() {
                return Err(AdjustmentError::NonConvergence {
                    iterations: maximal_iterations,
                    max_abs_dx,
                });
            }

            if adapted_damping > 0.0 {
                let alpha = (0.25 * adapted_damping.powf(-0.05)).min(0.75);
                dx *= alpha;
                max_abs_dx *= alpha;
            }

            // predicted residuals and weighted sum of squares of the step
            let mut candidate_omega = 0.0;
            let mut updates = Vec::with_capacity(system.equations.len());
            for equation in &system.equations {
                let ve = &equation.jx * &dx + &equation.misclosure;
                let wv = &equation.weight * &ve;
                candidate_omega += ve.dot(&wv);
                updates.push((equation, ve, wv));
            }

            if adapted_damping > 0.0 {
                if previous_omega >= candidate_omega {
                    adapted_damping *= 0.2;
                    previous_omega = candidate_omega;
                } else {
                    debug!(
                        "step rejected, omega {candidate_omega:.6e} exceeds \
                         {previous_omega:.6e}, raising the damping"
                    );
                    // reject the step and increase the damping
                    adapted_damping *= 5.0;
                    if adapted_damping > 1.0 / SQRT_EPS {
                        adapted_damping = 1.0 / SQRT_EPS;
                        previous_omega = 0.0;
                    }
                    max_abs_dx = last_valid_max_abs_dx;
                    is_first_iteration = false;
                    runs -= 1;
                    if runs < 0 {
                        return Err(AdjustmentError::NonConvergence {
                            iterations: maximal_iterations,
                            max_abs_dx,
                        });
                    }
                    continue;
                }
            }
            last_valid_max_abs_dx = max_abs_dx;
            omega = candidate_omega;
            debug!(
                "iteration {}: max|dx| = {max_abs_dx:.6e}, omega = {omega:.6e}, \
                 damping = {adapted_damping:.3e}",
                maximal_iterations as i64 - 1 - runs
            );

            // accepted: write residuals back and apply the step
            for (equation, _ve, wv) in &updates {
                let pair = &mut pairs[equation.index];
                let scaled_src =
                    pair.source().position().dispersion_apriori() / variance0;
                let scaled_trg =
                    pair.target().position().dispersion_apriori() / variance0;
                *pair.source_mut().residuals_mut() =
                    -(&scaled_src * equation.jv_source.transpose() * wv);
                *pair.target_mut().residuals_mut() =
                    -(&scaled_trg * equation.jv_target.transpose() * wv);
            }
            for parameter in self.transformation.parameters_mut() {
                let column = parameter.column();
                if column >= 0 {
                    let value = parameter.value() + dx[column as usize];
                    parameter.set_value(value);
                }
            }
            self.transformation.normalize_quaternion();

            if estimate_complete_model {
                if max_abs_dx > SQRT_EPS || system.max_abs_restriction > SQRT_EPS {
                    return Err(AdjustmentError::NonConvergence {
                        iterations: maximal_iterations,
                        max_abs_dx,
                    });
                }
                debug!("converged, final max|dx| = {max_abs_dx:.6e}");
                break;
            }

            if !is_first_iteration
                && adapted_damping == 0.0
                && max_abs_dx <= SQRT_EPS
                && system.max_abs_restriction <= SQRT_EPS
                && runs > 0
            {
                is_estimated = true;
            }
            is_first_iteration = false;
            runs -= 1;
            if runs < 0 {
                // one forced complete pass, failing if it still moves
                is_estimated = true;
            }
        }

        self.finalize(pairs, nou, omega, variance0)
    }

    /// Assembles the bordered normal equation system of one iteration.
    fn build_normal_equations(
        &self,
        pairs: &[HomologousFramePositionPair],
        nou: usize,
        nor: usize,
        adapted_damping: f64,
        variance0: f64,
    ) -> Result<NormalEquationSystem, AdjustmentError> {
        let size = nou + nor;
        let mut n_matrix = DMatrix::<f64>::zeros(size, size);
        let mut n_vector = DVector::<f64>::zeros(size);
        let mut equations = Vec::new();

        for (index, pair) in pairs.iter().enumerate() {
            if !pair.is_enabled() {
                continue;
            }
            let elements = self.transformation.normal_equation_elements(
                pair.source().position(),
                pair.target().position(),
                nou,
            );

            let scaled_src = pair.source().position().dispersion_apriori() / variance0;
            let scaled_trg = pair.target().position().dispersion_apriori() / variance0;
            let dispersion_w = &elements.jv_source * &scaled_src * elements.jv_source.transpose()
                + &elements.jv_target * &scaled_trg * elements.jv_target.transpose();
            let weight = invert_dispersion(&dispersion_w)?;

            // misclosure at the current residuals
            let misclosure = &elements.misclosure
                - &elements.jv_source * pair.source().residuals()
                - &elements.jv_target * pair.target().residuals();

            let jxt_w = elements.jx.transpose() * &weight;
            let mut n_block = n_matrix.view_mut((0, 0), (nou, nou));
            n_block += &jxt_w * &elements.jx;
            let mut n_rows = n_vector.rows_mut(0, nou);
            n_rows -= &jxt_w * &misclosure;

            equations.push(PairEquations {
                index,
                jx: elements.jx,
                jv_source: elements.jv_source,
                jv_target: elements.jv_target,
                misclosure,
                weight,
            });
        }

        let mut max_abs_restriction = 0.0f64;
        for (k, restriction) in self.transformation.restrictions().iter().enumerate() {
            let row = nou + k;
            for (parameter_index, coefficient) in
                self.transformation.restriction_jacobian(restriction)
            {
                let column = self.transformation.parameters()[parameter_index].column();
                if column < 0 {
                    continue;
                }
                n_matrix[(row, column as usize)] = coefficient;
                n_matrix[(column as usize, row)] = coefficient;
            }
            let misclosure = self.transformation.restriction_misclosure(restriction);
            n_vector[row] = -misclosure;
            max_abs_restriction = max_abs_restriction.max(misclosure.abs());
        }

        if adapted_damping > 0.0 {
            for i in 0..nou {
                n_matrix[(i, i)] *= 1.0 + adapted_damping;
            }
        }

        Ok(NormalEquationSystem {
            n_matrix,
            n_vector,
            max_abs_restriction,
            equations,
        })
    }

    /// Stochastic quantities and hypothesis tests of the complete pass.
    fn finalize(
        &mut self,
        pairs: &mut [HomologousFramePositionPair],
        nou: usize,
        omega: f64,
        variance0: f64,
    ) -> Result<(), AdjustmentError> {
        let dim = self.transformation.dimension();
        let dof = self.degree_of_freedom;
        self.variance_component.set_omega(omega * variance0);
        self.variance_component.set_redundancy(dof);

        let mut qxx = self.cofactor_matrix.take().ok_or_else(|| {
            AdjustmentError::SingularSystem(
                "cofactor matrix of the parameters is unavailable".to_string(),
            )
        })?;

        let number_of_pairs = pairs.iter().filter(|p| p.is_enabled()).count();
        let number_of_hypotheses = number_of_pairs + usize::from(dof > 0.0);
        let reference_dof = if self.config.test_statistic.familywise_error_rate {
            dof.max(1.0)
        } else {
            dim as f64
        };
        let mut test_statistics = TestStatisticParameters::new(
            &self.config.test_statistic,
            number_of_hypotheses,
            reference_dof,
        )?;

        self.add_stochastic_parameters(pairs, nou, &qxx, variance0, &mut test_statistics)?;
        self.variance_component.test(&mut test_statistics)?;

        self.transformation.reverse_center_of_masses(Some(&mut qxx));
        self.derive_and_test_parameters(&qxx, &mut test_statistics)?;
        self.cofactor_matrix = Some(qxx);
        Ok(())
    }

    /// Redundancy numbers, gross errors, detectable biases and the local
    /// test of every enabled pair.
    fn add_stochastic_parameters(
        &mut self,
        pairs: &mut [HomologousFramePositionPair],
        nou: usize,
        qxx: &DMatrix<f64>,
        variance0: f64,
        test_statistics: &mut TestStatisticParameters,
    ) -> Result<(), AdjustmentError> {
        let dim = self.transformation.dimension();
        let dof = self.degree_of_freedom;
        let prio = test_statistics.get(dim as f64, f64::INFINITY)?;
        let post = test_statistics.get(dim as f64, dof - dim as f64)?;

        for pair in pairs.iter_mut().filter(|p| p.is_enabled()) {
            let elements = self.transformation.normal_equation_elements(
                pair.source().position(),
                pair.target().position(),
                nou,
            );
            let scaled_src = pair.source().position().dispersion_apriori() / variance0;
            let scaled_trg = pair.target().position().dispersion_apriori() / variance0;
            let dispersion_w = &elements.jv_source * &scaled_src * elements.jv_source.transpose()
                + &elements.jv_target * &scaled_trg * elements.jv_target.transpose();
            let weight = invert_dispersion(&dispersion_w)?;

            let jx_qxx_jxt = &elements.jx * qxx * elements.jx.transpose();
            let qkk = &weight - &weight * &jx_qxx_jxt * &weight;

            let mut pair_redundancy = 0.0;
            for (frame, jv, scaled) in [
                (0usize, &elements.jv_source, &scaled_src),
                (1usize, &elements.jv_target, &scaled_trg),
            ] {
                let jv_qll = jv * scaled;
                let qvv_cofactor = jv_qll.transpose() * &qkk * &jv_qll;
                let weight_frame = invert_dispersion(scaled)?;
                let redundancy_matrix = &weight_frame * &qvv_cofactor;

                let frame_position = if frame == 0 {
                    pair.source_mut()
                } else {
                    pair.target_mut()
                };
                for i in 0..dim {
                    let r = redundancy_matrix[(i, i)].max(0.0);
                    frame_position.redundancies_mut()[i] = r;
                    frame_position.cofactors_mut()[i] =
                        (scaled[(i, i)] - qvv_cofactor[(i, i)]).max(0.0);
                    if dof > 0.0 {
                        pair_redundancy += r;
                    }
                }
            }

            if dof <= 0.0 || pair_redundancy <= SQRT_EPS {
                continue;
            }

            // residual of the condition equation and its weighted form
            let ve = &elements.jv_source * pair.source().residuals()
                + &elements.jv_target * pair.target().residuals();
            let wv = &weight * &ve;

            let qvv_w = &dispersion_w - &jx_qxx_jxt;
            let mut ww_qvv_ww = &weight * &qvv_w * &weight;
            // enforce symmetry lost to rounding
            ww_qvv_ww = 0.5 * (&ww_qvv_ww + ww_qvv_ww.transpose());

            let nabla = -(pseudo_inverse(&ww_qvv_ww)? * &wv);
            pair.set_gross_errors(nabla.clone());

            let weighted_nabla = &ww_qvv_ww * &nabla;
            let normalization = nabla.dot(&weighted_nabla);
            if normalization > EPS {
                let nabla0 = &nabla / normalization.sqrt();
                let mdb = DVector::from_iterator(
                    dim,
                    nabla0
                        .iter()
                        .map(|v| v * prio.noncentrality_parameter.abs().sqrt()),
                );
                pair.set_minimal_detectable_biases(mdb);
                pair.set_maximum_tolerable_biases(nabla0);
            }

            let numerator = (-wv.dot(&nabla)) * variance0;
            let statistic = ObjectTestStatistic::evaluate(
                numerator,
                dim as f64,
                &self.variance_component,
                &prio,
                &post,
            );
            pair.set_test_statistic(statistic);
        }
        Ok(())
    }

    /// Uncertainties and significance tests of the estimated and the
    /// derived parameters.
    fn derive_and_test_parameters(
        &mut self,
        qxx: &DMatrix<f64>,
        test_statistics: &mut TestStatisticParameters,
    ) -> Result<(), AdjustmentError> {
        let dof = self.degree_of_freedom;
        let applied_variance = self.applied_variance();
        let prio = test_statistics.get(1.0, f64::INFINITY)?;
        let post = test_statistics.get(1.0, dof - 1.0)?;

        let derived = self.transformation.derived_parameters(qxx);

        let mut tested: Vec<(UnknownParameter, f64)> = Vec::new();
        for parameter in self.transformation.parameters() {
            let column = parameter.column();
            let cofactor = if column >= 0 {
                qxx[(column as usize, column as usize)].max(0.0)
            } else {
                0.0
            };
            tested.push((parameter.clone(), cofactor));
        }
        let model_count = tested.len();
        tested.extend(derived);

        for (parameter, cofactor) in &mut tested {
            let uncertainty = (applied_variance * *cofactor).abs().sqrt();
            parameter.set_uncertainty(uncertainty);

            if parameter.processing_type() == ProcessingType::Fixed {
                continue;
            }
            let mut deviation = parameter.value() - parameter.expected_value();
            deviation = match parameter.parameter_type() {
                ParameterType::EulerAngleX
                | ParameterType::EulerAngleY
                | ParameterType::EulerAngleZ
                | ParameterType::Orientation => {
                    let wrapped = std::f64::consts::TAU - deviation;
                    if wrapped.abs() < deviation.abs() {
                        wrapped
                    } else {
                        deviation
                    }
                }
                ParameterType::ShearX | ParameterType::ShearY | ParameterType::ShearZ => {
                    let wrapped = std::f64::consts::PI - deviation;
                    if wrapped.abs() < deviation.abs() {
                        wrapped
                    } else {
                        deviation
                    }
                }
                _ => deviation,
            };

            if uncertainty > SQRT_EPS && deviation.abs() > SQRT_EPS && *cofactor > 0.0 {
                let numerator = deviation * deviation / *cofactor;
                let statistic = ObjectTestStatistic::evaluate(
                    numerator,
                    1.0,
                    &self.variance_component,
                    &prio,
                    &post,
                );
                parameter.set_test_statistic(statistic);
            }
        }

        let mut tested = tested.into_iter().map(|(p, _)| p);
        for parameter in self.transformation.parameters_mut() {
            if let Some(updated) = tested.next() {
                *parameter = updated;
            }
        }
        debug_assert!(model_count == self.transformation.parameters().len());
        self.derived_parameters = tested.collect();
        Ok(())
    }

    /// Applies the estimated transformation to further source positions,
    /// propagating the parameter uncertainties.
    pub fn transform_pairs(
        &self,
        pairs: &mut [FramePositionPair],
    ) -> Result<(), AdjustmentError> {
        let qxx = self.cofactor_matrix.as_ref().ok_or_else(|| {
            AdjustmentError::InvalidConfiguration(
                "transformation has not been estimated yet".to_string(),
            )
        })?;
        let dim = self.transformation.dimension();
        let variance0 = self.variance_component.variance0();
        for pair in pairs.iter_mut() {
            pair.reset();
            if !pair.is_enabled() {
                continue;
            }
            if pair.dimension() != dim {
                return Err(AdjustmentError::InvalidConfiguration(format!(
                    "position pair {} has dimension {}, the model expects {dim}",
                    pair.name(),
                    pair.dimension()
                )));
            }
            self.transformation.transform(pair, qxx, variance0);
        }
        Ok(())
    }
}
