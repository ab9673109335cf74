pub mod adjust_errors;
pub mod confidence;
pub mod congruence;
pub mod constants;
pub mod linalg;
pub mod observations;
pub mod points;
pub mod statistics;
pub mod transformation;
