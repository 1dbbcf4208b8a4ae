//! Cluster collaborator error types.

use thiserror::Error;

/// Errors returned by cluster providers and metrics sources.
///
/// A call that exceeds its deadline is reported as the failure of the
/// operation it belonged to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("cluster authentication failed: {0}")]
    Authentication(String),

    #[error("listing {resource} failed: {reason}")]
    ResourceList {
        resource: &'static str,
        reason: String,
    },

    #[error("usage for pod {pod} unavailable: {reason}")]
    MetricsFetch { pod: String, reason: String },

    #[error("usage for pod {pod} malformed: {reason}")]
    MetricsParse { pod: String, reason: String },

    #[error("setting replicas of {workload} failed: {reason}")]
    ReplicaUpdate { workload: String, reason: String },
}

impl ClusterError {
    pub fn list(resource: &'static str, reason: impl Into<String>) -> Self {
        ClusterError::ResourceList {
            resource,
            reason: reason.into(),
        }
    }

    /// Whether this error invalidates a whole sampling cycle.
    pub fn aborts_cycle(&self) -> bool {
        matches!(
            self,
            ClusterError::ResourceList { .. } | ClusterError::Authentication(_)
        )
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
