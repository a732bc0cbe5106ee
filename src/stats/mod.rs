//! Per-domain resource usage.
//!
//! Raw counters come from a pluggable `MetricsProvider`; aggregation
//! normalizes them into usage snapshots keyed by domain name.

mod cgroup;

pub use cgroup::CgroupMetricsProvider;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::Result;

/// Raw counters for one domain, as read from its resource controller.
///
/// Units are defined by the provider and passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    /// Bytes of memory currently in use
    pub memory_used: u64,

    /// Memory limit in bytes
    pub memory_limit: u64,

    /// Cumulative CPU time consumed by the domain
    pub cpu_time_total: u64,
}

/// Point-in-time usage snapshot derived from raw counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Used memory as a share of the limit, clamped to 0..=100
    pub used_memory_percent: f64,

    /// Bytes of memory in use
    pub used_memory: u64,

    /// Bytes still available under the limit
    pub available_memory: u64,

    /// Cumulative CPU time, unconverted
    pub cpu_total: u64,
}

impl From<ResourceMetrics> for UsageSnapshot {
    fn from(counters: ResourceMetrics) -> Self {
        let used_memory_percent = if counters.memory_limit > 0 {
            (counters.memory_used as f64 / counters.memory_limit as f64 * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            used_memory_percent,
            used_memory: counters.memory_used,
            available_memory: counters.memory_limit.saturating_sub(counters.memory_used),
            cpu_total: counters.cpu_time_total,
        }
    }
}

/// Source of resource counters for registered domains.
///
/// Implementations translate the domain name into whatever identifier
/// their backing store keys on.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Prepare the provider; called once before the first query.
    async fn init_client(&self) -> Result<()>;

    /// Fetch current counters for one domain.
    async fn get_metrics(&self, container_id: &str) -> Result<ResourceMetrics>;
}

/// Query every domain concurrently and keep the answers that arrive.
///
/// A failing domain is logged and skipped; it never aborts the sweep.
pub(crate) async fn collect_usage(
    domains: Vec<String>,
    provider: Arc<dyn MetricsProvider>,
) -> HashMap<String, UsageSnapshot> {
    let mut queries = JoinSet::new();
    for domain in domains {
        let provider = Arc::clone(&provider);
        queries.spawn(async move {
            let result = provider.get_metrics(&domain).await;
            (domain, result)
        });
    }

    let mut snapshots = HashMap::new();
    while let Some(joined) = queries.join_next().await {
        let (domain, result) = match joined {
            Ok(answer) => answer,
            Err(err) => {
                warn!(error = %err, "Metrics query task failed");
                continue;
            }
        };
        match result {
            Ok(counters) => {
                snapshots.insert(domain, UsageSnapshot::from(counters));
            }
            Err(err) => {
                metrics::counter!("kvm_metrics_skipped_total").increment(1);
                warn!(domain = %domain, error = %err, "Skipping domain with failing metrics");
            }
        }
    }
    snapshots
}
