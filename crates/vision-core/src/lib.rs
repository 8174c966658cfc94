pub mod config;
pub mod models;
pub mod types;

pub use config::{VisionConfig, parse_duration};
pub use models::{ModelCatalog, ModelEntry, ModelError};
pub use types::*;
