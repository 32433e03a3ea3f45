//! Forecast horizon decomposition and the rolling per-instrument forecast table.
//!
//! [`HorizonMap`] converts bucketed ("coarse") forecasts into per-bar ("fine")
//! forecasts under a per-bar variance weighting and back. [`ForecastTable`]
//! accumulates fine forecasts from several registered models into a
//! `(2n, n)` delivery-by-origin matrix and rolls it at end of day.

pub mod error;
pub mod history;
pub mod horizon;
pub mod source;
pub mod table;

pub use error::ForecastError;
pub use history::ForecastHistory;
pub use horizon::{HorizonIndex, HorizonMap};
pub use source::ForecastSource;
pub use table::{ForecastTable, ModelId, ModelSpec};
