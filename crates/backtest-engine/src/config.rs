use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bar_store::{RollSchedule, SessionConfig};
use chrono::NaiveDate;
use market_core::InstrumentUniverse;
use position_sizer::SizerConfig;
use serde::{Deserialize, Serialize};

/// How a model's coarse forecasts are produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelKind {
    /// Precomputed `n × nf` forecasts under `<dir>/<symbol>/<YYYYMMDD>.json`.
    Replay { dir: PathBuf },
    /// Autoregressive bar-return model. `phi` is re-estimated daily from the
    /// trailing `lookback_days` when not fixed.
    Ar1 {
        #[serde(default)]
        phi: Option<f64>,
        #[serde(default = "default_ar1_lookback")]
        lookback_days: usize,
    },
}

fn default_ar1_lookback() -> usize {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Bucket endpoints (`ixf`) of the model's coarse forecast.
    pub horizon: Vec<usize>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(flatten)]
    pub kind: ModelKind,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub symbols: Vec<String>,
    pub start_day: NaiveDate,
    pub end_day: NaiveDate,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub sizer: SizerConfig,

    pub models: Vec<ModelConfig>,

    /// Per-symbol execution parameters; override the sizer's cost fields.
    /// Validated when the config is parsed.
    #[serde(default)]
    pub instruments: InstrumentUniverse,

    /// Futures roll schedules keyed by symbol.
    #[serde(default)]
    pub rolls: HashMap<String, RollSchedule>,

    /// Trailing days used for the per-bar variance profile.
    #[serde(default = "default_variance_lookback")]
    pub variance_lookback_days: usize,

    #[serde(default = "default_variance_floor")]
    pub variance_floor: f64,

    /// Forecast length handed to the sizer; defaults to the longest model horizon.
    #[serde(default)]
    pub horizon_length: Option<usize>,

    /// Leading days that only warm up the forecast table and variance profile.
    #[serde(default = "default_warmup_days")]
    pub warmup_days: usize,

    #[serde(default)]
    pub save_history: bool,

    /// Bars per time-of-day group in the report.
    #[serde(default = "default_group_bars")]
    pub group_bars: usize,

    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,

    /// Gap threshold (bars) for the per-day quality check.
    #[serde(default = "default_max_gap_bars")]
    pub max_gap_bars: usize,
}

fn default_variance_lookback() -> usize {
    20
}

fn default_variance_floor() -> f64 {
    1e-5
}

fn default_warmup_days() -> usize {
    1
}

fn default_group_bars() -> usize {
    12
}

fn default_periods_per_year() -> f64 {
    252.0
}

fn default_max_gap_bars() -> usize {
    12
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Apply `AR1_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("AR1_START_DAY") {
            self.start_day = parse_day("AR1_START_DAY", &v)?;
        }
        if let Some(v) = lookup("AR1_END_DAY") {
            self.end_day = parse_day("AR1_END_DAY", &v)?;
        }
        if let Some(v) = lookup("AR1_SYMBOLS") {
            self.symbols = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("AR1_MAXPOS") {
            self.sizer.maxpos = v.parse().context("AR1_MAXPOS")?;
        }
        if let Some(v) = lookup("AR1_MIN_TRADE") {
            self.sizer.min_trade = v.parse().context("AR1_MIN_TRADE")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.end_day < self.start_day {
            bail!("end_day {} is before start_day {}", self.end_day, self.start_day);
        }
        if self.symbols.is_empty() {
            bail!("no symbols configured");
        }
        if self.models.is_empty() {
            bail!("no models configured");
        }
        if self.variance_lookback_days == 0 {
            bail!("variance_lookback_days must be positive");
        }
        if self.variance_floor.is_nan() || self.variance_floor <= 0.0 {
            bail!("variance_floor must be positive");
        }
        if self.group_bars == 0 {
            bail!("group_bars must be positive");
        }
        self.session.validate()?;
        self.sizer.validate()?;
        Ok(())
    }

    /// Longest model horizon, or the configured override.
    pub fn horizon_length(&self) -> usize {
        self.horizon_length.unwrap_or_else(|| {
            self.models
                .iter()
                .filter_map(|m| m.horizon.last().map(|e| e + 1))
                .max()
                .unwrap_or(1)
        })
    }

    /// Sizer config with the symbol's instrument costs applied.
    pub fn sizer_for(&self, symbol: &str) -> SizerConfig {
        let mut sizer = self.sizer.clone();
        if let Ok(spec) = self.instruments.get(symbol) {
            sizer.tcost = spec.tcost;
            sizer.fee = spec.fee;
            sizer.contract_size = spec.contract_size;
        }
        sizer
    }
}

fn parse_day(key: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("{key}: expected YYYY-MM-DD, got {value:?}"))
}
