//! # Observation model
//!
//! Typed terrestrial and GNSS observations with their a-priori
//! uncertainties. Observation groups are kind homogeneous; after an
//! adjustment has attached residuals and redundancy numbers, a group
//! accumulates them into the variance component of its kind.

use nalgebra::DVector;

use crate::adjust_errors::AdjustmentError;
use crate::statistics::variance_component::{VarianceComponent, VarianceComponentType};
use crate::transformation::parameter::{ParameterType, ProcessingType, UnknownParameter};

/// Kind of a geodetic observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationType {
    Leveling,
    Direction,
    HorizontalDistance,
    SlopeDistance,
    ZenithAngle,
    GnssBaseline1D,
    GnssBaseline2D,
    GnssBaseline3D,
}

impl ObservationType {
    /// Number of components of one observation of this kind.
    pub fn dimension(&self) -> usize {
        match self {
            ObservationType::GnssBaseline2D => 2,
            ObservationType::GnssBaseline3D => 3,
            _ => 1,
        }
    }

    pub fn variance_component_type(&self) -> VarianceComponentType {
        match self {
            ObservationType::Leveling => VarianceComponentType::Leveling,
            ObservationType::Direction => VarianceComponentType::Direction,
            ObservationType::HorizontalDistance => VarianceComponentType::HorizontalDistance,
            ObservationType::SlopeDistance => VarianceComponentType::SlopeDistance,
            ObservationType::ZenithAngle => VarianceComponentType::ZenithAngle,
            ObservationType::GnssBaseline1D => VarianceComponentType::GnssBaseline1D,
            ObservationType::GnssBaseline2D => VarianceComponentType::GnssBaseline2D,
            ObservationType::GnssBaseline3D => VarianceComponentType::GnssBaseline3D,
        }
    }
}

/// One observation between a station and a target point.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    station_name: String,
    target_name: String,
    values: DVector<f64>,
    sigmas_apriori: DVector<f64>,
    residuals: Option<DVector<f64>>,
    redundancies: Option<DVector<f64>>,
    enabled: bool,
}

impl Observation {
    pub fn new(
        station_name: &str,
        target_name: &str,
        values: &[f64],
        sigmas_apriori: &[f64],
    ) -> Result<Self, AdjustmentError> {
        if station_name.is_empty() || target_name.is_empty() {
            return Err(AdjustmentError::IncompleteRecord(format!(
                "observation {station_name} -> {target_name} misses an endpoint name"
            )));
        }
        if values.len() != sigmas_apriori.len() {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "observation {station_name} -> {target_name} has {} values but {} uncertainties",
                values.len(),
                sigmas_apriori.len()
            )));
        }
        if sigmas_apriori.iter().any(|&s| s <= 0.0) {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "observation {station_name} -> {target_name} has a non-positive uncertainty"
            )));
        }
        Ok(Self {
            station_name: station_name.to_string(),
            target_name: target_name.to_string(),
            values: DVector::from_row_slice(values),
            sigmas_apriori: DVector::from_row_slice(sigmas_apriori),
            residuals: None,
            redundancies: None,
            enabled: true,
        })
    }

    pub fn station_name(&self) -> &str {
        &self.station_name
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn sigmas_apriori(&self) -> &DVector<f64> {
        &self.sigmas_apriori
    }

    pub fn residuals(&self) -> Option<&DVector<f64>> {
        self.residuals.as_ref()
    }

    pub fn redundancies(&self) -> Option<&DVector<f64>> {
        self.redundancies.as_ref()
    }

    /// Attaches the adjustment results of this observation.
    pub fn set_adjustment_results(
        &mut self,
        residuals: DVector<f64>,
        redundancies: DVector<f64>,
    ) -> Result<(), AdjustmentError> {
        if residuals.len() != self.dimension() || redundancies.len() != self.dimension() {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "adjustment results of {} -> {} do not match the observation dimension",
                self.station_name, self.target_name
            )));
        }
        self.residuals = Some(residuals);
        self.redundancies = Some(redundancies);
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn reset(&mut self) {
        self.residuals = None;
        self.redundancies = None;
    }
}

/// Kind homogeneous collection of observations.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationGroup {
    observation_type: ObservationType,
    observations: Vec<Observation>,
    /// Orientation unknown of a direction group.
    orientation: Option<UnknownParameter>,
}

impl ObservationGroup {
    pub fn new(observation_type: ObservationType) -> Self {
        let orientation = match observation_type {
            ObservationType::Direction => Some(UnknownParameter::new(
                ParameterType::Orientation,
                ProcessingType::Fixed,
                0.0,
            )),
            _ => None,
        };
        Self {
            observation_type,
            observations: Vec::new(),
            orientation,
        }
    }

    pub fn observation_type(&self) -> ObservationType {
        self.observation_type
    }

    pub fn orientation(&self) -> Option<&UnknownParameter> {
        self.orientation.as_ref()
    }

    pub fn add(&mut self, observation: Observation) -> Result<(), AdjustmentError> {
        if observation.dimension() != self.observation_type.dimension() {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "observation {} -> {} has dimension {}, group of type {:?} expects {}",
                observation.station_name(),
                observation.target_name(),
                observation.dimension(),
                self.observation_type,
                self.observation_type.dimension()
            )));
        }
        self.observations.push(observation);
        Ok(())
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn observations_mut(&mut self) -> &mut [Observation] {
        &mut self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Accumulates the variance component of this group from the
    /// residuals and redundancy numbers attached to its observations.
    ///
    /// `Ω = Σ v²/σ²·σ₀²` and `r = Σ rᵢ` run over the enabled
    /// observations that carry adjustment results.
    pub fn variance_component(&self, variance0: f64) -> VarianceComponent {
        let mut vc = VarianceComponent::new(self.observation_type.variance_component_type());
        vc.set_variance0(variance0);

        let mut count = 0;
        for observation in self.observations.iter().filter(|obs| obs.is_enabled()) {
            let (Some(residuals), Some(redundancies)) =
                (observation.residuals(), observation.redundancies())
            else {
                continue;
            };
            count += 1;
            for i in 0..observation.dimension() {
                let sigma = observation.sigmas_apriori()[i];
                vc.add_omega(residuals[i] * residuals[i] / (sigma * sigma) * vc.variance0());
                vc.add_redundancy(redundancies[i].max(0.0));
            }
        }
        vc.set_number_of_observations(count);
        vc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn group_enforces_kind_dimension() {
        let mut group = ObservationGroup::new(ObservationType::GnssBaseline3D);
        let flat = Observation::new("A", "B", &[1.0, 2.0], &[0.01, 0.01]).unwrap();
        assert!(group.add(flat).is_err());

        let baseline = Observation::new("A", "B", &[1.0, 2.0, 3.0], &[0.01, 0.01, 0.01]).unwrap();
        assert!(group.add(baseline).is_ok());
    }

    #[test]
    fn direction_group_carries_an_orientation_unknown() {
        let group = ObservationGroup::new(ObservationType::Direction);
        assert!(group.orientation().is_some());
        assert!(ObservationGroup::new(ObservationType::Leveling)
            .orientation()
            .is_none());
    }

    #[test]
    fn variance_component_accumulates_residuals() {
        let mut group = ObservationGroup::new(ObservationType::Leveling);
        for i in 0..4 {
            let mut obs =
                Observation::new("A", &format!("P{i}"), &[1.0 + i as f64], &[0.01]).unwrap();
            obs.set_adjustment_results(
                DVector::from_row_slice(&[0.01]),
                DVector::from_row_slice(&[0.5]),
            )
            .unwrap();
            group.add(obs).unwrap();
        }

        let vc = group.variance_component(1.0);
        assert_eq!(vc.number_of_observations(), 4);
        assert_relative_eq!(vc.redundancy(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(vc.variance(), 4.0 / 2.0, epsilon = 1e-12);
    }
}
