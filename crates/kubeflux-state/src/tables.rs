//! redb table definitions for the policy database.

use redb::TableDefinition;

/// Policy documents keyed by name; only [`CURRENT_POLICY_KEY`] is used.
pub const POLICY: TableDefinition<&str, &[u8]> = TableDefinition::new("policy");

/// Key of the live policy in the [`POLICY`] table.
pub const CURRENT_POLICY_KEY: &str = "current";
