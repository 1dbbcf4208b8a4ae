//! kubeflux-state — policy model and policy store for kube-flux.
//!
//! The `Policy` pairs the current operating `Mode` with a `FactorMatrix`
//! mapping every (mode, tier) pair to a target replica count.
//!
//! # Architecture
//!
//! ```text
//! PolicyStore (Clone, Arc<RwLock<Policy>>)
//!   ├── snapshot()   → owned copy, no lock held by the caller
//!   ├── set_mode()   ┐
//!   ├── set_matrix() ├ exclusive write, optional write-through to PolicyDb
//!   └── apply()      ┘
//!
//! PolicyDb (redb)
//!   └── table "policy", key "current" → JSON-serialized Policy
//! ```
//!
//! A `FactorMatrix` can only be built complete: deserialization and
//! `TryFrom<RawFactorMatrix>` reject missing entries, unknown names and
//! negative targets.

pub mod db;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use db::PolicyDb;
pub use error::{PolicyError, PolicyResult, StateError, StateResult};
pub use store::PolicyStore;
pub use types::*;
