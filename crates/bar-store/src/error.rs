use chrono::NaiveDate;
use market_core::MarketError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Insufficient data for {day}: {reason}")]
    InsufficientData { day: NaiveDate, reason: String },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Roll adjustment already applied to {0}")]
    RollAlreadyApplied(String),

    #[error("Invalid session config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Market(#[from] MarketError),
}
