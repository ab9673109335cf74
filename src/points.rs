//! # Point model
//!
//! Positions with a-priori dispersion, named points and dimension
//! homogeneous point groups. Point groups carry the epochs of an
//! analysis and the point-wise share of its principal components.

use nalgebra::{DMatrix, DVector};

use crate::adjust_errors::AdjustmentError;

/// Coordinates of a 1D, 2D or 3D position with its a-priori dispersion.
///
/// The coordinate vector holds `(z)`, `(x, y)` or `(x, y, z)` depending
/// on the dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    coordinates: DVector<f64>,
    dispersion_apriori: DMatrix<f64>,
}

impl Position {
    /// Position with identity a-priori dispersion.
    pub fn new(coordinates: &[f64]) -> Result<Self, AdjustmentError> {
        let dim = coordinates.len();
        Self::with_dispersion(coordinates, DMatrix::identity(dim, dim))
    }

    /// Position with a full a-priori dispersion matrix.
    pub fn with_dispersion(
        coordinates: &[f64],
        dispersion_apriori: DMatrix<f64>,
    ) -> Result<Self, AdjustmentError> {
        let dim = coordinates.len();
        if !(1..=3).contains(&dim) {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "position dimension must be 1, 2 or 3, got {dim}"
            )));
        }
        if dispersion_apriori.nrows() != dim || dispersion_apriori.ncols() != dim {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "dispersion matrix must be {dim}x{dim}"
            )));
        }
        if (0..dim).any(|i| dispersion_apriori[(i, i)] < 0.0) {
            return Err(AdjustmentError::InvalidConfiguration(
                "dispersion matrix has a negative diagonal element".into(),
            ));
        }
        Ok(Self {
            coordinates: DVector::from_row_slice(coordinates),
            dispersion_apriori,
        })
    }

    pub fn dimension(&self) -> usize {
        self.coordinates.len()
    }

    pub fn coordinates(&self) -> &DVector<f64> {
        &self.coordinates
    }

    pub fn dispersion_apriori(&self) -> &DMatrix<f64> {
        &self.dispersion_apriori
    }

    pub fn is_complete(&self) -> bool {
        self.coordinates.iter().all(|c| c.is_finite())
    }
}

/// Deflection of the vertical at a point, x/y angle with uncertainties.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VerticalDeflection {
    pub x: f64,
    pub y: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
}

/// A-posteriori state of a point after an analysis run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointResult {
    /// First principal component of the residual field at this point.
    pub first_principal_component: Option<DVector<f64>>,
}

/// A named point of one epoch or network.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    name: String,
    position: Position,
    vertical_deflection: Option<VerticalDeflection>,
    enabled: bool,
    result: PointResult,
}

impl Point {
    pub fn new(name: &str, position: Position) -> Self {
        Self {
            name: name.to_string(),
            position,
            vertical_deflection: None,
            enabled: true,
            result: PointResult::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.position.dimension()
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn vertical_deflection(&self) -> Option<&VerticalDeflection> {
        self.vertical_deflection.as_ref()
    }

    pub fn set_vertical_deflection(&mut self, deflection: VerticalDeflection) {
        self.vertical_deflection = Some(deflection);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn result(&self) -> &PointResult {
        &self.result
    }

    pub fn result_mut(&mut self) -> &mut PointResult {
        &mut self.result
    }

    /// Clears all a-posteriori fields.
    pub fn reset(&mut self) {
        self.result = PointResult::default();
    }
}

/// Role of a point group within an adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointGroupType {
    Reference,
    Stochastic,
    Datum,
    New,
}

/// Dimension homogeneous collection of uniquely named points.
#[derive(Debug, Clone, PartialEq)]
pub struct PointGroup {
    group_type: PointGroupType,
    dimension: usize,
    points: Vec<Point>,
}

impl PointGroup {
    pub fn new(group_type: PointGroupType, dimension: usize) -> Result<Self, AdjustmentError> {
        if !(1..=3).contains(&dimension) {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "point group dimension must be 1, 2 or 3, got {dimension}"
            )));
        }
        Ok(Self {
            group_type,
            dimension,
            points: Vec::new(),
        })
    }

    pub fn group_type(&self) -> PointGroupType {
        self.group_type
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Adds a point, enforcing the group dimension and name uniqueness.
    pub fn add(&mut self, point: Point) -> Result<(), AdjustmentError> {
        if point.name().is_empty() {
            return Err(AdjustmentError::IncompleteRecord(
                "point without a name".into(),
            ));
        }
        if point.dimension() != self.dimension {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "point {} has dimension {}, group expects {}",
                point.name(),
                point.dimension(),
                self.dimension
            )));
        }
        if self.get(point.name()).is_some() {
            return Err(AdjustmentError::InvalidConfiguration(format!(
                "point name {} is not unique within its group",
                point.name()
            )));
        }
        self.points.push(point);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Point> {
        self.points.iter().find(|p| p.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Point> {
        self.points.iter_mut().find(|p| p.name() == name)
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [Point] {
        &mut self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_rejects_duplicate_names_and_foreign_dimensions() {
        let mut group = PointGroup::new(PointGroupType::Reference, 2).unwrap();
        group
            .add(Point::new("100", Position::new(&[1.0, 2.0]).unwrap()))
            .unwrap();

        let duplicate = Point::new("100", Position::new(&[3.0, 4.0]).unwrap());
        assert!(group.add(duplicate).is_err());

        let one_dimensional = Point::new("101", Position::new(&[5.0]).unwrap());
        assert!(group.add(one_dimensional).is_err());
    }

    #[test]
    fn position_validates_dispersion_shape() {
        assert!(Position::with_dispersion(&[0.0, 0.0], DMatrix::identity(3, 3)).is_err());
        assert!(Position::new(&[1.0, 2.0, 3.0, 4.0]).is_err());
    }

    #[test]
    fn reset_clears_aposteriori_state() {
        let mut point = Point::new("1", Position::new(&[0.0]).unwrap());
        point.result_mut().first_principal_component = Some(DVector::from_row_slice(&[1.0]));
        point.reset();
        assert_eq!(point.result(), &PointResult::default());
    }
}
