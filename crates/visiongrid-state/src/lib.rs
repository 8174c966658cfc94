//! visiongrid-state — embedded persistence for VisionGrid.
//!
//! Backed by [redb](https://docs.rs/redb). Stores request records, aggregated
//! results, and user credentials. Values are JSON in `&[u8]` columns.
//!
//! The in-flight work queue is not stored here: a restart loses queued work
//! but keeps every request record and finished result.
//!
//! `StateStore` is `Clone` + `Send` + `Sync` (an `Arc<Database>`) and can be
//! shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
