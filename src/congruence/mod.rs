//! # Congruence analysis between two epochs
//!
//! Tests whether points measured in a reference and a control epoch are
//! congruent: for every homologous point the displacement vector is
//! tested against its dispersion, yielding gross-displacement flags,
//! minimal detectable displacements and confidence regions. A group may
//! additionally carry a strain analysis, the least-squares fit of an
//! affine displacement field over its points.

pub mod strain;

use nalgebra::{DMatrix, DVector};

use crate::adjust_errors::AdjustmentError;
use crate::confidence::ConfidenceRegion;
use crate::constants::EPS;
use crate::linalg::pseudo_inverse;
use crate::points::Position;
use crate::statistics::test_statistic::{
    ObjectTestStatistic, TestStatisticDefinition, TestStatisticParameters,
};
use crate::statistics::variance_component::{VarianceComponent, VarianceComponentType};
use crate::transformation::parameter::UnknownParameter;

/// A point observed in both epochs, with the optional cofactor blocks
/// of the joint adjustment.
///
/// The cofactors are given in units of the variance of unit weight.
/// Missing diagonal blocks default to the a-priori dispersions of the
/// positions, a missing cross block to zero (uncorrelated epochs).
#[derive(Debug, Clone, PartialEq)]
pub struct CongruenceAnalysisPointPair {
    name_in_reference_epoch: String,
    name_in_control_epoch: String,
    enabled: bool,
    reference: Position,
    control: Position,
    cofactor_reference: Option<DMatrix<f64>>,
    cofactor_cross: Option<DMatrix<f64>>,
    cofactor_control: Option<DMatrix<f64>>,
    displacement: Option<DVector<f64>>,
    uncertainties: Option<DVector<f64>>,
    minimal_detectable_biases: Option<DVector<f64>>,
    confidence_region: Option<ConfidenceRegion>,
    test_statistic: Option<ObjectTestStatistic>,
}

impl CongruenceAnalysisPointPair {
    pub fn new(
        name_in_reference_epoch: &str,
        name_in_control_epoch: &str,
        reference: Position,
        control: Position,
    ) -> Result<Self, AdjustmentError> {
        if reference.dimension() != control.dimension() {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "point pair {name_in_reference_epoch} / {name_in_control_epoch} mixes dimensions {} and {}",
                reference.dimension(),
                control.dimension()
            )));
        }
        Ok(Self {
            name_in_reference_epoch: name_in_reference_epoch.to_string(),
            name_in_control_epoch: name_in_control_epoch.to_string(),
            enabled: true,
            reference,
            control,
            cofactor_reference: None,
            cofactor_cross: None,
            cofactor_control: None,
            displacement: None,
            uncertainties: None,
            minimal_detectable_biases: None,
            confidence_region: None,
            test_statistic: None,
        })
    }

    pub fn name_in_reference_epoch(&self) -> &str {
        &self.name_in_reference_epoch
    }

    pub fn name_in_control_epoch(&self) -> &str {
        &self.name_in_control_epoch
    }

    pub fn dimension(&self) -> usize {
        self.reference.dimension()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// A pair takes part in the analysis only with a point name in each
    /// epoch, distinct names and finite coordinates in both epochs.
    pub fn is_complete(&self) -> bool {
        !self.name_in_reference_epoch.is_empty()
            && !self.name_in_control_epoch.is_empty()
            && self.name_in_reference_epoch != self.name_in_control_epoch
            && self.reference.is_complete()
            && self.control.is_complete()
    }

    pub fn reference(&self) -> &Position {
        &self.reference
    }

    pub fn control(&self) -> &Position {
        &self.control
    }

    /// Joint cofactor blocks `(Q11, Q12, Q22)` of reference and control
    /// coordinates, taken from an adjustment of both epochs.
    pub fn set_cofactor_blocks(
        &mut self,
        reference: DMatrix<f64>,
        cross: DMatrix<f64>,
        control: DMatrix<f64>,
    ) -> Result<(), AdjustmentError> {
        let dim = self.dimension();
        for block in [&reference, &cross, &control] {
            if block.nrows() != dim || block.ncols() != dim {
                return Err(AdjustmentError::InvalidConfiguration(format!(
                    "cofactor blocks of point pair {} / {} must be {dim}x{dim}",
                    self.name_in_reference_epoch, self.name_in_control_epoch
                )));
            }
        }
        self.cofactor_reference = Some(reference);
        self.cofactor_cross = Some(cross);
        self.cofactor_control = Some(control);
        Ok(())
    }

    /// Cofactor matrix of the displacement vector,
    /// `Qd = Q11 - Q12 - Q21 + Q22`.
    fn displacement_cofactor(&self, variance0: f64) -> DMatrix<f64> {
        let q11 = self
            .cofactor_reference
            .clone()
            .unwrap_or_else(|| self.reference.dispersion_apriori() / variance0);
        let q22 = self
            .cofactor_control
            .clone()
            .unwrap_or_else(|| self.control.dispersion_apriori() / variance0);
        match &self.cofactor_cross {
            Some(q12) => &q11 - q12 - q12.transpose() + q22,
            None => q11 + q22,
        }
    }

    pub fn displacement(&self) -> Option<&DVector<f64>> {
        self.displacement.as_ref()
    }

    pub fn uncertainties(&self) -> Option<&DVector<f64>> {
        self.uncertainties.as_ref()
    }

    /// Minimal detectable displacement per axis; `None` when the
    /// displacement dispersion is singular along the displacement.
    pub fn minimal_detectable_biases(&self) -> Option<&DVector<f64>> {
        self.minimal_detectable_biases.as_ref()
    }

    pub fn confidence_region(&self) -> Option<&ConfidenceRegion> {
        self.confidence_region.as_ref()
    }

    pub fn test_statistic(&self) -> Option<&ObjectTestStatistic> {
        self.test_statistic.as_ref()
    }

    pub fn is_significant(&self) -> bool {
        self.test_statistic
            .as_ref()
            .map(|t| t.significant)
            .unwrap_or(false)
    }

    pub fn reset(&mut self) {
        self.displacement = None;
        self.uncertainties = None;
        self.minimal_detectable_biases = None;
        self.confidence_region = None;
        self.test_statistic = None;
    }
}

/// Dimension homogeneous collection of point pairs of one analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct CongruenceAnalysisGroup {
    dimension: usize,
    analyse_strain: bool,
    pairs: Vec<CongruenceAnalysisPointPair>,
    strain_parameters: Vec<UnknownParameter>,
}

impl CongruenceAnalysisGroup {
    pub fn new(dimension: usize, analyse_strain: bool) -> Result<Self, AdjustmentError> {
        if !(1..=3).contains(&dimension) {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "congruence group dimension must be 1, 2 or 3, got {dimension}"
            )));
        }
        Ok(Self {
            dimension,
            analyse_strain,
            pairs: Vec::new(),
            strain_parameters: Vec::new(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn analyse_strain(&self) -> bool {
        self.analyse_strain
    }

    pub fn add(&mut self, pair: CongruenceAnalysisPointPair) -> Result<(), AdjustmentError> {
        if !pair.is_complete() {
            return Err(AdjustmentError::IncompleteRecord(format!(
                "point pair {} / {} is incomplete",
                pair.name_in_reference_epoch(),
                pair.name_in_control_epoch()
            )));
        }
        if pair.dimension() != self.dimension {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "point pair {} / {} has dimension {}, group expects {}",
                pair.name_in_reference_epoch(),
                pair.name_in_control_epoch(),
                pair.dimension(),
                self.dimension
            )));
        }
        self.pairs.push(pair);
        Ok(())
    }

    pub fn pairs(&self) -> &[CongruenceAnalysisPointPair] {
        &self.pairs
    }

    pub fn pairs_mut(&mut self) -> &mut [CongruenceAnalysisPointPair] {
        &mut self.pairs
    }

    /// Parameters of the strain analysis, empty before the analysis ran
    /// or when it is disabled.
    pub fn strain_parameters(&self) -> &[UnknownParameter] {
        &self.strain_parameters
    }
}

/// Engine of one congruence analysis run.
pub struct CongruenceAnalysis {
    test_statistic_definition: TestStatisticDefinition,
    variance_component: VarianceComponent,
}

impl CongruenceAnalysis {
    /// The variance component carries the a-priori variance of unit
    /// weight of the cofactors and, after an adjustment, the Ω and
    /// redundancy of the a-posteriori variance.
    pub fn new(
        definition: TestStatisticDefinition,
        variance_component: VarianceComponent,
    ) -> Self {
        Self {
            test_statistic_definition: definition,
            variance_component,
        }
    }

    /// Engine with a unit variance component, for displacements given
    /// directly with their dispersions.
    pub fn with_definition(definition: TestStatisticDefinition) -> Self {
        Self::new(
            definition,
            VarianceComponent::new(VarianceComponentType::Global),
        )
    }

    pub fn variance_component(&self) -> &VarianceComponent {
        &self.variance_component
    }

    fn applied_variance(&self) -> f64 {
        if self.variance_component.apply_aposteriori_variance() {
            self.variance_component.variance()
        } else {
            self.variance_component.variance0()
        }
    }

    /// Tests every enabled pair of the group for a significant
    /// displacement and, when requested, fits the strain field.
    pub fn analyse(&self, group: &mut CongruenceAnalysisGroup) -> Result<(), AdjustmentError> {
        let dim = group.dimension() as f64;
        let variance0 = self.variance_component.variance0();
        let redundancy = self.variance_component.redundancy();

        for pair in group.pairs_mut() {
            pair.reset();
        }
        let number_of_hypotheses = group
            .pairs()
            .iter()
            .filter(|p| p.is_enabled() && p.is_complete())
            .count();
        if number_of_hypotheses == 0 {
            return Ok(());
        }

        let reference_dof = if self.test_statistic_definition.familywise_error_rate {
            redundancy.max(1.0)
        } else {
            dim
        };
        let mut test_statistics = TestStatisticParameters::new(
            &self.test_statistic_definition,
            number_of_hypotheses,
            reference_dof,
        )?;
        let prio = test_statistics.get(dim, f64::INFINITY)?;
        let post = test_statistics.get(dim, redundancy - dim)?;
        let applied_variance = self.applied_variance();

        for pair in group
            .pairs_mut()
            .iter_mut()
            .filter(|p| p.is_enabled() && p.is_complete())
        {
            let displacement = pair.control.coordinates() - pair.reference.coordinates();
            let qd = pair.displacement_cofactor(variance0);
            let pd = pseudo_inverse(&qd)?;

            let weighted = &pd * &displacement;
            let numerator = displacement.dot(&weighted) * variance0;
            let statistic = ObjectTestStatistic::evaluate(
                numerator,
                dim,
                &self.variance_component,
                &prio,
                &post,
            );

            let dimension = pair.dimension();
            pair.uncertainties = Some(DVector::from_iterator(
                dimension,
                (0..dimension).map(|i| (applied_variance * qd[(i, i)].abs()).sqrt()),
            ));

            // minimal detectable displacement along the observed direction
            let quadratic_form = displacement.dot(&weighted);
            let norm = displacement.norm();
            if quadratic_form > EPS && norm > EPS {
                let direction = &displacement / norm;
                let scale = (prio.noncentrality_parameter.abs() * variance0
                    / (direction.dot(&(&pd * &direction))))
                .sqrt();
                pair.minimal_detectable_biases = Some(direction * scale);
            }

            pair.confidence_region = Some(ConfidenceRegion::new(&(qd * applied_variance))?);
            pair.displacement = Some(displacement);
            pair.test_statistic = Some(statistic);
        }

        group.strain_parameters = if group.analyse_strain() {
            strain::estimate_strain_parameters(
                group.pairs(),
                group.dimension(),
                &self.variance_component,
                &mut test_statistics,
            )?
        } else {
            Vec::new()
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pair(name: &str, reference: &[f64], control: &[f64]) -> CongruenceAnalysisPointPair {
        CongruenceAnalysisPointPair::new(
            name,
            &format!("{name}.1"),
            Position::new(reference).unwrap(),
            Position::new(control).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn pair_with_one_epoch_identity_is_incomplete() {
        let position = Position::new(&[1.0, 2.0]).unwrap();
        let same_name =
            CongruenceAnalysisPointPair::new("100", "100", position.clone(), position.clone())
                .unwrap();
        assert!(!same_name.is_complete());

        let unnamed_epoch =
            CongruenceAnalysisPointPair::new("100", "", position.clone(), position.clone())
                .unwrap();
        assert!(!unnamed_epoch.is_complete());

        let mut group = CongruenceAnalysisGroup::new(2, false).unwrap();
        assert!(group.add(same_name).is_err());
        let distinct =
            CongruenceAnalysisPointPair::new("100", "100.1", position.clone(), position).unwrap();
        assert!(group.add(distinct).is_ok());
    }

    #[test]
    fn identical_epochs_are_congruent() {
        let mut group = CongruenceAnalysisGroup::new(2, false).unwrap();
        for (name, p) in [("1", [10.0, 0.0]), ("2", [0.0, 10.0]), ("3", [5.0, 5.0])] {
            group.add(pair(name, &p, &p)).unwrap();
        }
        let analysis = CongruenceAnalysis::with_definition(TestStatisticDefinition::default());
        let mut checked = group;
        analysis.analyse(&mut checked).unwrap();

        for pair in checked.pairs() {
            assert!(
                !pair.is_significant(),
                "{} flagged",
                pair.name_in_reference_epoch()
            );
            assert_relative_eq!(pair.displacement().unwrap().norm(), 0.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn large_displacement_is_significant() {
        let mut group = CongruenceAnalysisGroup::new(2, false).unwrap();
        group.add(pair("stable", &[0.0, 0.0], &[0.0, 0.0])).unwrap();
        // 50σ displacement of the second point
        group.add(pair("moved", &[10.0, 0.0], &[60.0, 0.0])).unwrap();
        let analysis = CongruenceAnalysis::with_definition(TestStatisticDefinition::default());
        analysis.analyse(&mut group).unwrap();

        assert!(!group.pairs()[0].is_significant());
        assert!(group.pairs()[1].is_significant());
    }

    #[test]
    fn detectable_displacement_is_reported_along_the_movement() {
        let mut group = CongruenceAnalysisGroup::new(2, false).unwrap();
        group.add(pair("p", &[0.0, 0.0], &[3.0, 4.0])).unwrap();
        let analysis = CongruenceAnalysis::with_definition(TestStatisticDefinition::default());
        analysis.analyse(&mut group).unwrap();

        let mdb = group.pairs()[0].minimal_detectable_biases().unwrap();
        // parallel to the displacement (3, 4)/5
        assert_relative_eq!(mdb[0] / mdb[1], 3.0 / 4.0, epsilon = 1e-9);
    }

    #[test]
    fn untestable_pair_carries_no_detectable_bias() {
        let mut group = CongruenceAnalysisGroup::new(1, false).unwrap();
        let mut p = pair("z", &[5.0], &[5.0]);
        // singular displacement cofactor
        p.set_cofactor_blocks(
            DMatrix::zeros(1, 1),
            DMatrix::zeros(1, 1),
            DMatrix::zeros(1, 1),
        )
        .unwrap();
        group.add(p).unwrap();
        let analysis = CongruenceAnalysis::with_definition(TestStatisticDefinition::default());
        analysis.analyse(&mut group).unwrap();
        assert!(group.pairs()[0].minimal_detectable_biases().is_none());
    }
}
