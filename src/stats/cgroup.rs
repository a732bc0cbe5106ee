//! cgroup v2 metrics provider.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{MetricsProvider, ResourceMetrics};
use crate::error::{KvmError, Result};

/// Mountpoint of the unified cgroup hierarchy.
const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Reads memory and CPU counters straight from the unified cgroup
/// hierarchy. Domains map to cgroups by name under the configured root.
///
/// CPU totals are microseconds, exactly as `cpu.stat` publishes them.
pub struct CgroupMetricsProvider {
    root: PathBuf,
}

impl CgroupMetricsProvider {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_CGROUP_ROOT),
        }
    }

    /// Read from a different hierarchy root (tests, containerized hosts).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_counter(&self, path: &Path) -> Result<u64> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| KvmError::MetricsProvider {
                reason: format!("read {}: {err}", path.display()),
            })?;
        let value = raw.trim();
        // an unlimited controller publishes the literal "max"
        if value == "max" {
            return Ok(u64::MAX);
        }
        value.parse().map_err(|err| KvmError::MetricsProvider {
            reason: format!("parse {}: {err}", path.display()),
        })
    }

    /// `cpu.stat` is a flat key/value file; the total sits in the
    /// `usage_usec` row.
    async fn read_cpu_total(&self, path: &Path) -> Result<u64> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| KvmError::MetricsProvider {
                reason: format!("read {}: {err}", path.display()),
            })?;
        for line in raw.lines() {
            if let Some(value) = line.strip_prefix("usage_usec ") {
                return value.trim().parse().map_err(|err| KvmError::MetricsProvider {
                    reason: format!("parse {}: {err}", path.display()),
                });
            }
        }
        Err(KvmError::MetricsProvider {
            reason: format!("no usage_usec row in {}", path.display()),
        })
    }
}

impl Default for CgroupMetricsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsProvider for CgroupMetricsProvider {
    async fn init_client(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(KvmError::MetricsProvider {
                reason: format!("cgroup root {} is not a directory", self.root.display()),
            });
        }
        debug!(root = %self.root.display(), "cgroup metrics provider ready");
        Ok(())
    }

    async fn get_metrics(&self, container_id: &str) -> Result<ResourceMetrics> {
        let dir = self.root.join(container_id);
        let memory_used = self.read_counter(&dir.join("memory.current")).await?;
        let memory_limit = self.read_counter(&dir.join("memory.max")).await?;
        let cpu_time_total = self.read_cpu_total(&dir.join("cpu.stat")).await?;
        Ok(ResourceMetrics {
            memory_used,
            memory_limit,
            cpu_time_total,
        })
    }
}
