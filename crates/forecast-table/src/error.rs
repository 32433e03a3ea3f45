use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("Invalid horizon index: {0}")]
    InvalidHorizonIndex(String),

    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid variance profile: {0}")]
    InvalidVariance(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid model registration: {0}")]
    InvalidModel(String),

    #[error("Model {0} supplied more than once in one update")]
    DuplicateModel(String),

    #[error("Bar {bar} out of range (limit {limit})")]
    BarOutOfRange { bar: usize, limit: usize },

    #[error("Non-finite forecast from model {model} at bar {bar}")]
    NonFinite { model: String, bar: usize },

    #[error("Forecast history unavailable: {0}")]
    HistoryUnavailable(String),

    #[error("Forecast source error: {0}")]
    Source(String),
}
