use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use market_core::Bar;

use crate::StoreError;

/// Where raw, un-normalized rows for a symbol and day come from.
pub trait RawBarSource {
    /// Raw rows for `symbol` on `day`, ordered by `utc`, or `None` when the
    /// archive has nothing for that day.
    fn load_day(&self, symbol: &str, day: NaiveDate) -> Result<Option<Vec<Bar>>, StoreError>;
}

impl<T: RawBarSource + ?Sized> RawBarSource for &T {
    fn load_day(&self, symbol: &str, day: NaiveDate) -> Result<Option<Vec<Bar>>, StoreError> {
        (**self).load_day(symbol, day)
    }
}

/// In-memory archive, mostly for tests and replay.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    days: HashMap<(String, NaiveDate), Vec<Bar>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, day: NaiveDate, rows: Vec<Bar>) {
        self.days.insert((symbol.to_string(), day), rows);
    }
}

impl RawBarSource for MemorySource {
    fn load_day(&self, symbol: &str, day: NaiveDate) -> Result<Option<Vec<Bar>>, StoreError> {
        Ok(self.days.get(&(symbol.to_string(), day)).cloned())
    }
}

/// On-disk archive laid out as `<root>/<symbol>/<YYYYMMDD>.json`, each file
/// a JSON array of 9-column rows.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn day_path(&self, symbol: &str, day: NaiveDate) -> PathBuf {
        self.root
            .join(symbol)
            .join(format!("{}.json", day.format("%Y%m%d")))
    }

    /// Write one day's rows, creating the symbol directory if needed.
    pub fn write_day(&self, symbol: &str, day: NaiveDate, rows: &[Bar]) -> Result<(), StoreError> {
        let path = self.day_path(symbol, day);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, serde_json::to_string(rows)?)?;
        Ok(())
    }
}

impl RawBarSource for JsonDirSource {
    fn load_day(&self, symbol: &str, day: NaiveDate) -> Result<Option<Vec<Bar>>, StoreError> {
        let path = self.day_path(symbol, day);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        let rows: Vec<Bar> = serde_json::from_str(&text)?;
        Ok(Some(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_dir_round_trip() {
        let root = std::env::temp_dir().join(format!("bar-store-src-{}", std::process::id()));
        let source = JsonDirSource::new(&root);
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let rows = vec![Bar::flat(60, 10.0, 59.0), Bar::flat(120, 10.5, 119.0)];

        source.write_day("ES", day, &rows).unwrap();
        assert!(source.day_path("ES", day).ends_with("ES/20240305.json"));
        assert_eq!(source.load_day("ES", day).unwrap(), Some(rows));
        assert_eq!(source.load_day("NQ", day).unwrap(), None);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_json_dir_bad_file_is_an_error() {
        let root = std::env::temp_dir().join(format!("bar-store-bad-{}", std::process::id()));
        let source = JsonDirSource::new(&root);
        let day = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        let path = source.day_path("ES", day);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[1, 2]]").unwrap();

        assert!(matches!(source.load_day("ES", day), Err(StoreError::Json(_))));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_memory_source() {
        let mut source = MemorySource::new();
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        source.insert("ES", day, vec![Bar::flat(60, 1.0, 0.0)]);
        assert_eq!(source.load_day("ES", day).unwrap().map(|r| r.len()), Some(1));
        assert!(source.load_day("ES", day.succ_opt().unwrap()).unwrap().is_none());
    }
}
