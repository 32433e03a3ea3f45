//! Intraday bar normalization onto a fixed per-day session grid.
//!
//! Raw vendor rows (possibly finer than the grid, gapped, or containing
//! zero-price ticks) are bucketed and gap-filled into exactly `n` bars per
//! trading day. Days that cannot be normalized are skipped and recorded
//! rather than failing the whole request.

pub mod calendar;
pub mod error;
pub mod normalize;
pub mod quality;
pub mod roll;
pub mod source;
pub mod store;

pub use calendar::{SessionCalendar, SessionConfig};
pub use error::StoreError;
pub use normalize::normalize_ref_utc;
pub use quality::{check_day_quality, DayQualityReport};
pub use roll::{roll_adj, RollSchedule};
pub use source::{JsonDirSource, MemorySource, RawBarSource};
pub use store::BarStore;
