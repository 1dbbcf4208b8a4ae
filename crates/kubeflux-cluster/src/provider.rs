//! Collaborator interfaces consumed by the autoscaler core.
//!
//! Both traits are object-safe and return boxed futures so they can be
//! shared as `Arc<dyn ...>` between the control loop and API handlers.

use std::future::Future;
use std::pin::Pin;

use crate::error::ClusterError;
use crate::types::{Pod, PodUsageSample, Selector, Workload};

/// Boxed future alias for collaborator calls.
pub type ClusterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClusterError>> + Send + 'a>>;

/// Lists workloads and pods, and changes replica counts.
///
/// Implementations bound every call with their own deadline; the core
/// treats a timeout like any other failure.
pub trait ClusterProvider: Send + Sync {
    /// List workloads matching `selector`.
    fn list_workloads<'a>(&'a self, selector: &'a Selector) -> ClusterFuture<'a, Vec<Workload>>;

    /// List the pods belonging to `workload`.
    fn list_pods<'a>(
        &'a self,
        workload: &'a Workload,
        selector: &'a Selector,
    ) -> ClusterFuture<'a, Vec<Pod>>;

    /// Request a new replica count for a workload.
    fn set_replicas<'a>(&'a self, workload_id: &'a str, replicas: u32) -> ClusterFuture<'a, ()>;
}

/// Reports the most recent resource usage of a pod.
pub trait MetricsSource: Send + Sync {
    fn pod_usage<'a>(&'a self, pod: &'a Pod) -> ClusterFuture<'a, PodUsageSample>;
}
