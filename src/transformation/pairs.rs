//! Homologous position pairs observed in a source and a target frame.

use nalgebra::DVector;

use crate::adjust_errors::AdjustmentError;
use crate::points::Position;
use crate::statistics::test_statistic::ObjectTestStatistic;

/// A position of one frame taking part in the adjustment, together
/// with its per-axis residuals, redundancy numbers and a-posteriori
/// cofactors.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePosition {
    position: Position,
    residuals: DVector<f64>,
    redundancies: DVector<f64>,
    cofactors: DVector<f64>,
}

impl FramePosition {
    pub fn new(position: Position) -> Self {
        let dim = position.dimension();
        Self {
            position,
            residuals: DVector::zeros(dim),
            redundancies: DVector::zeros(dim),
            cofactors: DVector::zeros(dim),
        }
    }

    pub fn dimension(&self) -> usize {
        self.position.dimension()
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn residuals(&self) -> &DVector<f64> {
        &self.residuals
    }

    pub(crate) fn residuals_mut(&mut self) -> &mut DVector<f64> {
        &mut self.residuals
    }

    pub fn redundancies(&self) -> &DVector<f64> {
        &self.redundancies
    }

    pub(crate) fn redundancies_mut(&mut self) -> &mut DVector<f64> {
        &mut self.redundancies
    }

    pub fn cofactors(&self) -> &DVector<f64> {
        &self.cofactors
    }

    pub(crate) fn cofactors_mut(&mut self) -> &mut DVector<f64> {
        &mut self.cofactors
    }

    fn reset(&mut self) {
        self.residuals.fill(0.0);
        self.redundancies.fill(0.0);
        self.cofactors.fill(0.0);
    }
}

/// A named point observed in both frames, the carrier of one set of
/// condition equations.
///
/// The a-posteriori fields (gross errors, detectable biases, test
/// statistic) are populated by the adjustment and cleared again by
/// [`reset`](HomologousFramePositionPair::reset); a disabled pair is
/// excluded from the next run but still reset, so no stale values
/// survive.
#[derive(Debug, Clone, PartialEq)]
pub struct HomologousFramePositionPair {
    name: String,
    enabled: bool,
    source: FramePosition,
    target: FramePosition,
    gross_errors: Option<DVector<f64>>,
    minimal_detectable_biases: Option<DVector<f64>>,
    maximum_tolerable_biases: Option<DVector<f64>>,
    test_statistic: Option<ObjectTestStatistic>,
}

impl HomologousFramePositionPair {
    pub fn new(name: &str, source: Position, target: Position) -> Result<Self, AdjustmentError> {
        if source.dimension() != target.dimension() {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "position pair {name} mixes dimensions {} and {}",
                source.dimension(),
                target.dimension()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            enabled: true,
            source: FramePosition::new(source),
            target: FramePosition::new(target),
            gross_errors: None,
            minimal_detectable_biases: None,
            maximum_tolerable_biases: None,
            test_statistic: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.source.dimension()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// A pair is usable only with a name and finite coordinates in both
    /// frames.
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty()
            && self.source.position().is_complete()
            && self.target.position().is_complete()
    }

    pub fn source(&self) -> &FramePosition {
        &self.source
    }

    pub(crate) fn source_mut(&mut self) -> &mut FramePosition {
        &mut self.source
    }

    pub fn target(&self) -> &FramePosition {
        &self.target
    }

    pub(crate) fn target_mut(&mut self) -> &mut FramePosition {
        &mut self.target
    }

    pub fn gross_errors(&self) -> Option<&DVector<f64>> {
        self.gross_errors.as_ref()
    }

    pub(crate) fn set_gross_errors(&mut self, gross_errors: DVector<f64>) {
        self.gross_errors = Some(gross_errors);
    }

    /// Minimal detectable bias per axis; `None` when the pair carries no
    /// redundancy and is therefore untestable.
    pub fn minimal_detectable_biases(&self) -> Option<&DVector<f64>> {
        self.minimal_detectable_biases.as_ref()
    }

    pub(crate) fn set_minimal_detectable_biases(&mut self, biases: DVector<f64>) {
        self.minimal_detectable_biases = Some(biases);
    }

    pub fn maximum_tolerable_biases(&self) -> Option<&DVector<f64>> {
        self.maximum_tolerable_biases.as_ref()
    }

    pub(crate) fn set_maximum_tolerable_biases(&mut self, biases: DVector<f64>) {
        self.maximum_tolerable_biases = Some(biases);
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

    /// Clears every a-posteriori field of the pair.
    pub fn reset(&mut self) {
        self.source.reset();
        self.target.reset();
        self.gross_errors = None;
        self.minimal_detectable_biases = None;
        self.maximum_tolerable_biases = None;
        self.test_statistic = None;
    }
}

/// Result of applying an estimated transformation to a source position.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatedFramePosition {
    pub coordinates: DVector<f64>,
    /// Diagonal cofactors of the transformed position.
    pub cofactors: DVector<f64>,
    /// Residuals against an observed target position, when one exists.
    pub residuals: Option<DVector<f64>>,
}

/// A position known in the source frame, to be mapped into the target
/// frame by an estimated transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePositionPair {
    name: String,
    enabled: bool,
    source: Position,
    target_observed: Option<Position>,
    target_estimated: Option<EstimatedFramePosition>,
}

impl FramePositionPair {
    pub fn new(name: &str, source: Position) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            source,
            target_observed: None,
            target_estimated: None,
        }
    }

    /// Pair with a known target position, yielding residuals after the
    /// transformation has been applied.
    pub fn with_observed_target(
        name: &str,
        source: Position,
        target: Position,
    ) -> Result<Self, AdjustmentError> {
        if source.dimension() != target.dimension() {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "position pair {name} mixes dimensions {} and {}",
                source.dimension(),
                target.dimension()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            enabled: true,
            source,
            target_observed: Some(target),
            target_estimated: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.source.dimension()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn source(&self) -> &Position {
        &self.source
    }

    pub fn target_observed(&self) -> Option<&Position> {
        self.target_observed.as_ref()
    }

    pub fn target_estimated(&self) -> Option<&EstimatedFramePosition> {
        self.target_estimated.as_ref()
    }

    pub(crate) fn set_target_estimated(&mut self, target: EstimatedFramePosition) {
        self.target_estimated = Some(target);
    }

    pub fn reset(&mut self) {
        self.target_estimated = None;
    }
}
