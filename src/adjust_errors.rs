use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdjustmentError {
    #[error("Normal equation system is singular: {0}")]
    SingularSystem(String),

    #[error(
        "Estimation did not converge within {iterations} iterations, last max|dx| = {max_abs_dx:e}"
    )]
    NonConvergence { iterations: usize, max_abs_dx: f64 },

    #[error("Incomplete record excluded from the adjustment: {0}")]
    IncompleteRecord(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid distribution parameters: {0}")]
    InvalidDistribution(String),

    #[error("ROOTS finding error: {0}")]
    RootFindingError(#[from] roots::SearchError),
}

impl PartialEq for AdjustmentError {
    fn eq(&self, other: &Self) -> bool {
        use AdjustmentError::*;
        match (self, other) {
            (SingularSystem(a), SingularSystem(b)) => a == b,
            (
                NonConvergence {
                    iterations: a,
                    max_abs_dx: x,
                },
                NonConvergence {
                    iterations: b,
                    max_abs_dx: y,
                },
            ) => a == b && x == y,
            (IncompleteRecord(a), IncompleteRecord(b)) => a == b,
            (InvalidConfiguration(a), InvalidConfiguration(b)) => a == b,
            (InvalidDistribution(a), InvalidDistribution(b)) => a == b,
            (RootFindingError(a), RootFindingError(b)) => a == b,
            _ => false,
        }
    }
}
