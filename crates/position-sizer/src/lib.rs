//! Bar-by-bar position sizing from fine forecasts, with hysteresis,
//! saturation and intraday sizing windows, plus the matching PnL accounting.

pub mod config;
pub mod error;
pub mod pnl;
pub mod sizer;
pub mod solver;

pub use config::{SizerConfig, SizingWindow, TradeWindow};
pub use error::{SizingError, SolverError};
pub use pnl::{pnl_from_positions, CostModel, PnlSeries};
pub use sizer::{BarInput, DayPositions, DecisionReason, PositionSizer, SizingDecision};
pub use solver::{MeanVarianceSolver, PositionSolver, SolverInput};
