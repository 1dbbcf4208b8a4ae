//! kubeflux-cluster — the cluster collaborators of the autoscaler.
//!
//! The core talks to the outside world through two traits:
//!
//! | Trait | Operations |
//! |---|---|
//! | [`ClusterProvider`] | `list_workloads`, `list_pods`, `set_replicas` |
//! | [`MetricsSource`] | `pod_usage` |
//!
//! Two implementations ship with the crate: [`KubeClient`] for a real
//! Kubernetes API endpoint and [`StaticCluster`], an in-memory cluster for
//! dry runs and tests.

pub mod error;
pub mod kube;
pub mod provider;
pub mod static_cluster;
pub mod types;

pub use error::{ClusterError, ClusterResult};
pub use kube::{KubeClient, KubeConfig};
pub use provider::{ClusterFuture, ClusterProvider, MetricsSource};
pub use static_cluster::{StaticCluster, StaticPod, StaticWorkload};
pub use types::*;
