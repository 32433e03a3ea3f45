pub mod config;
pub mod engine;
pub mod report;
pub mod sources;
pub mod variance;

pub use config::{EngineConfig, ModelConfig, ModelKind};
pub use engine::{run_symbol, run_universe, SymbolBacktest};
pub use report::{DayReport, GroupPnl, SymbolFailure, SymbolReport, UniverseReport};
pub use sources::{build_sources, Ar1Source, ReplaySource};
pub use variance::VarianceProfile;
