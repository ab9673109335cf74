use approx::assert_relative_eq;
use nalgebra::Vector3;

use geoadjust::adjust_errors::AdjustmentError;
use geoadjust::linalg::sorted_symmetric_eigen;
use geoadjust::points::Position;
use geoadjust::transformation::adjustment::TransformationAdjustment;
use geoadjust::transformation::pairs::{FramePositionPair, HomologousFramePositionPair};
use geoadjust::transformation::parameter::ParameterType;
use geoadjust::transformation::{TransformationConfig, TransformationType};

const SCALE: f64 = 1.0005;
const ROTATION_Z: f64 = 0.002;
const SHIFT: [f64; 3] = [10.0, -20.0, 30.0];

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn rotate_z(x: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(
        ROTATION_Z.cos() * x[0] - ROTATION_Z.sin() * x[1],
        ROTATION_Z.sin() * x[0] + ROTATION_Z.cos() * x[1],
        x[2],
    )
}

fn exact_pair(index: usize, source: &[f64; 3]) -> HomologousFramePositionPair {
    let x = Vector3::from_row_slice(source);
    let t = SCALE * rotate_z(&x) + Vector3::from_row_slice(&SHIFT);
    HomologousFramePositionPair::new(
        &format!("p{index}"),
        Position::new(source).unwrap(),
        Position::new(&[t[0], t[1], t[2]]).unwrap(),
    )
    .unwrap()
}

fn similarity_pairs() -> Vec<HomologousFramePositionPair> {
    let sources = [
        [0.0, 0.0, 0.0],
        [100.0, 0.0, 0.0],
        [0.0, 100.0, 0.0],
        [0.0, 0.0, 100.0],
        [100.0, 100.0, 100.0],
    ];
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| exact_pair(i, s))
        .collect()
}

fn similarity_config() -> TransformationConfig {
    init_logging();
    TransformationConfig::builder(TransformationType::SpatialAffine)
        .fix(ParameterType::AuxiliaryElement12, 0.0)
        .fix(ParameterType::AuxiliaryElement13, 0.0)
        .fix(ParameterType::AuxiliaryElement23, 0.0)
        .couple(
            ParameterType::AuxiliaryElement11,
            ParameterType::AuxiliaryElement22,
        )
        .couple(
            ParameterType::AuxiliaryElement11,
            ParameterType::AuxiliaryElement33,
        )
        .build()
        .unwrap()
}

fn parameter_value(adjustment: &TransformationAdjustment, t: ParameterType) -> f64 {
    adjustment
        .transformation()
        .parameters()
        .iter()
        .find(|p| p.parameter_type() == t)
        .map(|p| p.value())
        .unwrap()
}

fn derived_value(adjustment: &TransformationAdjustment, t: ParameterType) -> f64 {
    adjustment
        .derived_parameters()
        .iter()
        .find(|p| p.parameter_type() == t)
        .map(|p| p.value())
        .unwrap()
}

#[test]
fn spatial_similarity_is_recovered() {
    let mut adjustment = TransformationAdjustment::new(similarity_config()).unwrap();
    let mut pairs = similarity_pairs();
    adjustment.estimate(&mut pairs).unwrap();

    assert_relative_eq!(
        parameter_value(&adjustment, ParameterType::ShiftX),
        SHIFT[0],
        epsilon = 1e-6
    );
    assert_relative_eq!(
        parameter_value(&adjustment, ParameterType::ShiftY),
        SHIFT[1],
        epsilon = 1e-6
    );
    assert_relative_eq!(
        parameter_value(&adjustment, ParameterType::ShiftZ),
        SHIFT[2],
        epsilon = 1e-6
    );
    assert_relative_eq!(
        derived_value(&adjustment, ParameterType::ScaleX),
        SCALE,
        epsilon = 1e-9
    );
    assert_relative_eq!(
        derived_value(&adjustment, ParameterType::EulerAngleZ),
        ROTATION_Z,
        epsilon = 1e-9
    );
}

#[test]
fn estimated_quaternion_keeps_unit_norm() {
    let mut adjustment = TransformationAdjustment::new(similarity_config()).unwrap();
    let mut pairs = similarity_pairs();
    adjustment.estimate(&mut pairs).unwrap();

    let norm: f64 = adjustment
        .transformation()
        .parameters()
        .iter()
        .filter(|p| {
            matches!(
                p.parameter_type(),
                ParameterType::QuaternionQ0
                    | ParameterType::QuaternionQ1
                    | ParameterType::QuaternionQ2
                    | ParameterType::QuaternionQ3
            )
        })
        .map(|p| p.value() * p.value())
        .sum();
    assert_relative_eq!(norm, 1.0, epsilon = 1e-12);
}

#[test]
fn redundancy_numbers_sum_to_the_degree_of_freedom() {
    let mut adjustment = TransformationAdjustment::new(similarity_config()).unwrap();
    let mut pairs = similarity_pairs();
    adjustment.estimate(&mut pairs).unwrap();

    let dof = adjustment.degree_of_freedom();
    assert_relative_eq!(dof, 8.0, epsilon = 0.0);

    let total: f64 = pairs
        .iter()
        .map(|p| p.source().redundancies().sum() + p.target().redundancies().sum())
        .sum();
    assert_relative_eq!(total, dof, epsilon = 1e-6);
}

#[test]
fn parameter_dispersion_is_positive_semidefinite_on_the_diagonal() {
    let mut adjustment = TransformationAdjustment::new(similarity_config()).unwrap();
    let mut pairs = similarity_pairs();
    adjustment.estimate(&mut pairs).unwrap();

    let dispersion = adjustment.dispersion_matrix().unwrap();
    for i in 0..dispersion.nrows() {
        assert!(dispersion[(i, i)] >= 0.0, "negative variance at {i}");
    }
    let correlation = adjustment.correlation_matrix().unwrap();
    for i in 0..correlation.nrows() {
        assert_relative_eq!(correlation[(i, i)], 1.0, epsilon = 1e-12);
        for j in 0..correlation.ncols() {
            assert!(correlation[(i, j)].abs() <= 1.0 + 1e-9);
        }
    }
}

#[test]
fn parameter_dispersion_is_symmetric_and_positive_semidefinite() {
    let mut adjustment = TransformationAdjustment::new(similarity_config()).unwrap();
    let mut pairs = similarity_pairs();
    adjustment.estimate(&mut pairs).unwrap();

    let dispersion = adjustment.dispersion_matrix().unwrap();
    for i in 0..dispersion.nrows() {
        for j in 0..dispersion.ncols() {
            assert_relative_eq!(
                dispersion[(i, j)],
                dispersion[(j, i)],
                epsilon = 1e-12,
                max_relative = 1e-9
            );
        }
    }

    let (eigenvalues, _) = sorted_symmetric_eigen(&dispersion);
    let scale = eigenvalues[0].abs().max(1.0);
    for (i, eigenvalue) in eigenvalues.iter().enumerate() {
        assert!(
            *eigenvalue >= -1e-9 * scale,
            "negative eigenvalue {eigenvalue} at {i}"
        );
    }
}

#[test]
fn detectable_bias_shrinks_with_growing_redundancy() {
    let mdb_of_first = |extra_sources: &[[f64; 3]]| {
        let mut adjustment = TransformationAdjustment::new(similarity_config()).unwrap();
        let mut pairs = similarity_pairs();
        for (i, source) in extra_sources.iter().enumerate() {
            pairs.push(exact_pair(5 + i, source));
        }
        adjustment.estimate(&mut pairs).unwrap();
        pairs[0].minimal_detectable_biases().unwrap().norm()
    };

    let sparse = mdb_of_first(&[]);
    let dense = mdb_of_first(&[[50.0, 0.0, 50.0], [0.0, 50.0, 50.0], [50.0, 50.0, 0.0]]);
    assert!(
        dense < sparse,
        "detectable bias grew from {sparse} to {dense} despite the added pairs"
    );
}

#[test]
fn consistent_pairs_are_not_flagged() {
    let mut adjustment = TransformationAdjustment::new(similarity_config()).unwrap();
    let mut pairs = similarity_pairs();
    adjustment.estimate(&mut pairs).unwrap();

    for pair in &pairs {
        assert!(!pair.is_significant(), "{} flagged", pair.name());
        assert!(pair.minimal_detectable_biases().is_some());
    }
    assert!(!adjustment.variance_component_of_unit_weight().is_significant());
}

#[test]
fn too_few_pairs_raise_a_singular_system_error() {
    let mut adjustment = TransformationAdjustment::new(similarity_config()).unwrap();
    let mut pairs = similarity_pairs();
    for pair in pairs.iter_mut().skip(2) {
        pair.set_enabled(false);
    }
    let result = adjustment.estimate(&mut pairs);
    assert!(matches!(result, Err(AdjustmentError::SingularSystem(_))));
}

#[test]
fn transform_maps_new_positions_into_the_target_frame() {
    let mut adjustment = TransformationAdjustment::new(similarity_config()).unwrap();
    let mut pairs = similarity_pairs();
    adjustment.estimate(&mut pairs).unwrap();

    let source = Vector3::new(50.0, 25.0, 10.0);
    let expected = SCALE * rotate_z(&source) + Vector3::from_row_slice(&SHIFT);
    let mut unknowns = vec![FramePositionPair::new(
        "new",
        Position::new(&[source[0], source[1], source[2]]).unwrap(),
    )];
    adjustment.transform_pairs(&mut unknowns).unwrap();

    let estimated = unknowns[0].target_estimated().unwrap();
    for i in 0..3 {
        assert_relative_eq!(estimated.coordinates[i], expected[i], epsilon = 1e-6);
        assert!(estimated.cofactors[i] > 0.0);
    }
}

#[test]
fn planar_affine_model_is_recovered() {
    // x' = tx + a11 x - a12 y, y' = ty + a21 x + a22 y
    let (tx, ty) = (5.0, -3.0);
    let (a11, a12, a21, a22) = (1.0002, 0.0004, 0.0004, 0.9998);
    let sources = [[0.0, 0.0], [100.0, 0.0], [0.0, 100.0], [100.0, 100.0]];
    let mut pairs: Vec<_> = sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let t = [
                tx + a11 * s[0] - a12 * s[1],
                ty + a21 * s[0] + a22 * s[1],
            ];
            HomologousFramePositionPair::new(
                &format!("p{i}"),
                Position::new(s).unwrap(),
                Position::new(&t).unwrap(),
            )
            .unwrap()
        })
        .collect();

    init_logging();
    let config = TransformationConfig::builder(TransformationType::PlanarAffine)
        .build()
        .unwrap();
    let mut adjustment = TransformationAdjustment::new(config).unwrap();
    adjustment.estimate(&mut pairs).unwrap();

    assert_relative_eq!(
        parameter_value(&adjustment, ParameterType::ShiftX),
        tx,
        epsilon = 1e-8
    );
    assert_relative_eq!(
        parameter_value(&adjustment, ParameterType::ShiftY),
        ty,
        epsilon = 1e-8
    );
    assert_relative_eq!(
        parameter_value(&adjustment, ParameterType::AuxiliaryElement11),
        a11,
        epsilon = 1e-10
    );
    assert_relative_eq!(
        parameter_value(&adjustment, ParameterType::AuxiliaryElement21),
        a21,
        epsilon = 1e-10
    );
}

#[test]
fn gross_error_in_one_pair_is_localized()
{
    let mut adjustment = TransformationAdjustment::new(similarity_config()).unwrap();
    let mut pairs = similarity_pairs();
    // bias one target coordinate well above the unit a-priori noise
    let biased = Position::new(&[
        pairs[4].target().position().coordinates()[0] + 25.0,
        pairs[4].target().position().coordinates()[1],
        pairs[4].target().position().coordinates()[2],
    ])
    .unwrap();
    pairs[4] = HomologousFramePositionPair::new(
        "p4",
        pairs[4].source().position().clone(),
        biased,
    )
    .unwrap();

    adjustment.estimate(&mut pairs).unwrap();
    assert!(pairs[4].is_significant());
}
