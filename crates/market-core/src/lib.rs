pub mod error;
pub mod stats;
pub mod types;
pub mod universe;

pub use error::*;
pub use types::*;
pub use universe::*;
