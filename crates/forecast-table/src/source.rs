use chrono::NaiveDate;

use crate::ForecastError;

/// A named model emitting one coarse forecast per bar close.
pub trait ForecastSource {
    fn name(&self) -> &str;

    /// Bucket endpoints (`ixf`) of the coarse forecasts this source emits.
    fn horizon(&self) -> &[usize];

    /// Coarse forecast (length `horizon().len()`) made at the close of bar
    /// `bar` of `day`, or `None` if the model has nothing to say for that bar.
    fn produce(&mut self, day: NaiveDate, bar: usize) -> Result<Option<Vec<f64>>, ForecastError>;
}
