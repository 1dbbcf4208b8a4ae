//! PolicyDb — redb-backed persistence for the live policy.
//!
//! The policy is JSON-serialized into a single `&[u8]` value under a fixed
//! key. The database supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, StorageBackend};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::Policy;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe policy database backed by redb.
#[derive(Clone)]
pub struct PolicyDb {
    db: Arc<Database>,
}

impl PolicyDb {
    /// Open (or create) a persistent policy database at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "policy database opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory policy database (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        Self::open_with_backend(redb::backends::InMemoryBackend::new())
    }

    /// Open a policy database on a custom redb storage backend.
    pub fn open_with_backend(backend: impl StorageBackend) -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("policy database opened on custom backend");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POLICY).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Load the persisted policy, if one was ever saved.
    pub fn load_policy(&self) -> StateResult<Option<Policy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICY).map_err(map_err!(Table))?;
        match table.get(CURRENT_POLICY_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                let policy: Policy =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(policy))
            }
            None => Ok(None),
        }
    }

    /// Overwrite the persisted policy.
    pub fn save_policy(&self, policy: &Policy) -> StateResult<()> {
        let value = serde_json::to_vec(policy).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POLICY).map_err(map_err!(Table))?;
            table
                .insert(CURRENT_POLICY_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(mode = %policy.mode, "policy persisted");
        Ok(())
    }
}
