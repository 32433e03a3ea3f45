use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SizingError {
    #[error("Non-finite {field} at bar {bar}")]
    NonFiniteInput { bar: usize, field: String },

    #[error("Invalid sizer config: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },
}

/// Failure reported by a [`crate::PositionSolver`]. The sizer never
/// propagates it; it holds the current position instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Solver did not converge: {0}")]
    NonConvergence(String),

    #[error("Invalid solver input: {0}")]
    InvalidInput(String),
}
