//! StateStore: redb-backed persistence for VisionGrid.
//!
//! Typed operations over requests, results, and users. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use vision_core::RequestStatus;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(REQUESTS).map_err(map_err!(Table))?;
        txn.open_table(RESULTS).map_err(map_err!(Table))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic table access ───────────────────────────────────────

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    // ── Requests ───────────────────────────────────────────────────

    /// Insert or update a request record.
    pub fn save_request(&self, record: &RequestRecord) -> StateResult<()> {
        self.put(REQUESTS, record.table_key(), record)?;
        debug!(request_id = %record.id, status = %record.status, "request stored");
        Ok(())
    }

    pub fn get_request(&self, request_id: &str) -> StateResult<Option<RequestRecord>> {
        self.get(REQUESTS, request_id)
    }

    /// Update a stored request's status (and failure reason) in one write
    /// transaction.
    pub fn update_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        failure_reason: Option<String>,
    ) -> StateResult<RequestRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(REQUESTS).map_err(map_err!(Table))?;
            let mut record: RequestRecord = match table.get(request_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(request_id.to_string())),
            };
            record.status = status;
            if failure_reason.is_some() {
                record.failure_reason = failure_reason;
            }
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(request_id, value.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%request_id, %status, "request status stored");
        Ok(record)
    }

    /// Requests owned by `owner_email`, newest first.
    pub fn list_requests(&self, owner_email: &str) -> StateResult<Vec<RequestRecord>> {
        let mut records: Vec<RequestRecord> = self
            .list(REQUESTS)?
            .into_iter()
            .filter(|r: &RequestRecord| r.owner_email == owner_email)
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Delete a request and its result. Returns true if the request existed.
    pub fn delete_request(&self, request_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut requests = txn.open_table(REQUESTS).map_err(map_err!(Table))?;
            existed = requests.remove(request_id).map_err(map_err!(Write))?.is_some();
            let mut results = txn.open_table(RESULTS).map_err(map_err!(Table))?;
            results.remove(request_id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%request_id, existed, "request deleted");
        Ok(existed)
    }

    // ── Results ────────────────────────────────────────────────────

    pub fn save_result(&self, record: &ResultRecord) -> StateResult<()> {
        self.put(RESULTS, &record.request_id, record)?;
        debug!(request_id = %record.request_id, count = record.descriptions.len(), "result stored");
        Ok(())
    }

    pub fn get_result(&self, request_id: &str) -> StateResult<Option<ResultRecord>> {
        self.get(RESULTS, request_id)
    }

    // ── Users ──────────────────────────────────────────────────────

    pub fn put_user(&self, user: &UserRecord) -> StateResult<()> {
        self.put(USERS, &user.email, user)
    }

    pub fn get_user(&self, email: &str) -> StateResult<Option<UserRecord>> {
        self.get(USERS, email)
    }
}
