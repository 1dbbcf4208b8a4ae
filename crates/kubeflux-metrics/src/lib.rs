//! kubeflux-metrics — per-tier resource usage.
//!
//! [`UsageAggregator`] samples every pod of every tiered workload and
//! reduces the samples to one [`AggregateUsage`] per cycle. The
//! [`prometheus`] module renders usage and policy as Prometheus text.

pub mod aggregator;
pub mod prometheus;
pub mod quantity;

pub use aggregator::{AggregateUsage, TierUsage, UsageAggregator};
pub use prometheus::render_prometheus;
pub use quantity::{QuantityError, parse_cpu_nanocores, parse_memory_kib};
