//! PolicyStore — the single process-wide holder of the live policy.
//!
//! Reads hand out owned snapshots; writes validate first, persist (when a
//! `PolicyDb` is attached) and only then swap the in-memory value, all
//! under one write lock. A reader never sees a mode and a matrix coming
//! from two different writes.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::db::PolicyDb;
use crate::error::PolicyResult;
use crate::types::{FactorMatrix, Mode, Policy, PolicyUpdate};

/// Shared, lock-guarded policy with optional write-through persistence.
#[derive(Clone)]
pub struct PolicyStore {
    current: Arc<RwLock<Policy>>,
    db: Option<PolicyDb>,
}

impl PolicyStore {
    /// An in-memory store starting from `initial`.
    pub fn new(initial: Policy) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial)),
            db: None,
        }
    }

    /// A persistent store. Starts from the saved policy, or from
    /// `fallback` when the database holds none.
    pub fn open(db: PolicyDb, fallback: Policy) -> PolicyResult<Self> {
        let initial = match db.load_policy()? {
            Some(saved) => {
                info!(mode = %saved.mode, "restored persisted policy");
                saved
            }
            None => {
                info!(mode = %fallback.mode, "no persisted policy, using default");
                fallback
            }
        };

        Ok(Self {
            current: Arc::new(RwLock::new(initial)),
            db: Some(db),
        })
    }

    /// Whether writes are persisted.
    pub fn is_persistent(&self) -> bool {
        self.db.is_some()
    }

    /// Owned copy of the current policy.
    pub async fn snapshot(&self) -> Policy {
        self.current.read().await.clone()
    }

    /// Replace the mode only.
    pub async fn set_mode(&self, mode: Mode) -> PolicyResult<Policy> {
        self.apply(PolicyUpdate::mode(mode)).await
    }

    /// Replace the factor matrix only.
    pub async fn set_matrix(&self, factor_matrix: FactorMatrix) -> PolicyResult<Policy> {
        self.apply(PolicyUpdate::matrix(factor_matrix)).await
    }

    /// Apply mode and/or matrix as one atomic swap.
    ///
    /// On a persistence failure the in-memory policy is left untouched.
    pub async fn apply(&self, update: PolicyUpdate) -> PolicyResult<Policy> {
        let mut current = self.current.write().await;
        let next = update.apply_to(&current);

        if let Some(db) = &self.db {
            db.save_policy(&next)?;
        }

        let previous_mode = current.mode;
        *current = next.clone();
        debug!(
            from = %previous_mode,
            to = %next.mode,
            matrix_replaced = update.factor_matrix.is_some(),
            "policy updated"
        );
        Ok(next)
    }
}
