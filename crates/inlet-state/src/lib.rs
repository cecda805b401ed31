//! Prior-run watermark storage for the Inlet pull engine.

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::WatermarkStore;
pub use error::StateError;
pub use sqlite::SqliteWatermarkStore;
