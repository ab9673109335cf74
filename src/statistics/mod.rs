//! # Statistical test engine
//!
//! Hypothesis testing of an adjustment: critical values and
//! noncentrality parameters per strategy (unadjusted, Šidák, Baarda
//! B-method), logarithmic p-values, object-level variance-ratio tests
//! and variance components of unit weight.

pub mod distributions;
pub mod test_statistic;
pub mod variance_component;
