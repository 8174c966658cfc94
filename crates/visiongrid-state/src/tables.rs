//! redb table definitions for the VisionGrid state store.
//!
//! Every table uses `&str` keys and `&[u8]` values holding JSON.

use redb::TableDefinition;

/// Request records keyed by `{request_id}`.
pub const REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("requests");

/// Aggregated results keyed by `{request_id}`.
pub const RESULTS: TableDefinition<&str, &[u8]> = TableDefinition::new("results");

/// Users keyed by `{email}`.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
