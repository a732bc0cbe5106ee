//! Domain lifecycle management.
//!
//! `KvmContext` owns the name-to-identifier registry and drives every
//! domain through created, running and stopped, keeping one runtime-state
//! directory and at most one hypervisor process per domain.

mod monitor;
mod process;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::conf;
use crate::conf::doc::ConfigDocument;
use crate::error::{KvmError, Result};
use crate::paths;
use crate::stats::{self, MetricsProvider, UsageSnapshot};
use crate::types::{AdapterPool, DiskEntry, MachineModel, VmDescriptor};

/// Default runtime-state root.
const DEFAULT_STATE_ROOT: &str = "/var/run/hypervisor/kvm";

/// Poll interval while waiting for control sockets to appear.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Arguments handed to the hypervisor ahead of the per-domain ones.
const HYPERVISOR_ARGS: [&str; 4] = ["-display", "none", "-no-user-config", "-nodefaults"];

/// Lifecycle state of one registered domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainState {
    /// Registered, configuration on disk, no process yet
    Created,

    /// Hypervisor process up and serving its control sockets
    Running,

    /// Hypervisor process gone, registration and state directory kept
    Stopped,
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Registry entry for one domain.
#[derive(Debug)]
struct DomainRecord {
    id: u32,
    config_path: PathBuf,
    state: DomainState,
    child: Option<Child>,
    pid: Option<u32>,
}

/// KVM backend context.
///
/// All methods take `&self`; the registry is guarded internally. Callers
/// serialize operations per domain name, the locks only protect the map
/// and the records themselves.
pub struct KvmContext {
    model: MachineModel,
    state_root: PathBuf,
    hypervisor_exec: PathBuf,
    hypervisor_args: Vec<String>,
    next_id: AtomicU32,
    domains: RwLock<HashMap<String, Arc<Mutex<DomainRecord>>>>,
}

impl KvmContext {
    pub fn new(model: MachineModel) -> Self {
        Self {
            model,
            state_root: PathBuf::from(DEFAULT_STATE_ROOT),
            hypervisor_exec: PathBuf::from(model.hypervisor_exec()),
            hypervisor_args: HYPERVISOR_ARGS.iter().map(|arg| arg.to_string()).collect(),
            next_id: AtomicU32::new(1),
            domains: RwLock::new(HashMap::new()),
        }
    }

    /// Use a different runtime-state root (tests, chrooted deployments).
    pub fn with_state_root(mut self, state_root: impl Into<PathBuf>) -> Self {
        self.state_root = state_root.into();
        self
    }

    /// Replace the hypervisor executable and its fixed arguments.
    pub fn with_hypervisor(mut self, exec: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.hypervisor_exec = exec.into();
        self.hypervisor_args = args;
        self
    }

    /// Backend name used in manager-level dispatch.
    pub fn name(&self) -> &'static str {
        "kvm"
    }

    /// Machine model this context renders and boots.
    pub fn model(&self) -> MachineModel {
        self.model
    }

    /// Synthesize the configuration document for `domain` without touching
    /// the filesystem.
    pub fn build_dom_config(
        &self,
        domain: &str,
        desc: &VmDescriptor,
        disks: &[DiskEntry],
        pool: &AdapterPool,
    ) -> Result<ConfigDocument> {
        conf::build(domain, desc, disks, pool, self.model, &self.state_root)
    }

    /// Synthesize and write the configuration file for `domain`.
    #[instrument(skip(self, desc, disks, pool), fields(domain = %domain))]
    pub async fn create_dom_config(
        &self,
        domain: &str,
        desc: &VmDescriptor,
        disks: &[DiskEntry],
        pool: &AdapterPool,
        config_path: &Path,
    ) -> Result<()> {
        let doc = self.build_dom_config(domain, desc, disks, pool)?;
        tokio::fs::write(config_path, doc.render())
            .await
            .map_err(|source| KvmError::Io {
                path: config_path.to_path_buf(),
                source,
            })?;
        debug!(config = %config_path.display(), "Domain configuration written");
        Ok(())
    }

    /// Register `domain` and set up its runtime-state directory.
    ///
    /// No process is spawned here; the domain sits in the created state
    /// until `start`. Returns the registry identifier.
    #[instrument(skip(self, desc), fields(domain = %domain))]
    pub async fn create(
        &self,
        domain: &str,
        config_path: &Path,
        desc: &VmDescriptor,
    ) -> Result<u32> {
        info!("Creating domain");
        desc.validate(domain)?;

        let mut domains = self.domains.write().await;
        if domains.contains_key(domain) {
            return Err(KvmError::StateConflict {
                domain: domain.to_string(),
                reason: "name is already registered".to_string(),
            });
        }

        let dir = paths::domain_dir(&self.state_root, domain);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| KvmError::Io {
                path: dir.clone(),
                source,
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        domains.insert(
            domain.to_string(),
            Arc::new(Mutex::new(DomainRecord {
                id,
                config_path: config_path.to_path_buf(),
                state: DomainState::Created,
                child: None,
                pid: None,
            })),
        );

        metrics::counter!("kvm_domains_created_total").increment(1);
        info!(id, "Domain registered");
        Ok(id)
    }

    /// Boot `domain`: spawn the hypervisor, record its pid and wait for the
    /// control sockets to come up.
    ///
    /// On any failure the spawned process is reaped and the domain drops
    /// back to the created state, so the caller can retry.
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn start(&self, domain: &str, timeout: Duration) -> Result<()> {
        info!("Starting domain");
        let started = Instant::now();

        let record = self.lookup(domain).await?;
        let mut record = record.lock().await;
        if record.state != DomainState::Created {
            return Err(KvmError::StateConflict {
                domain: domain.to_string(),
                reason: format!("domain is {}, start requires created", record.state),
            });
        }

        let mut command = Command::new(&self.hypervisor_exec);
        command
            .args(&self.hypervisor_args)
            .arg("-name")
            .arg(domain)
            .arg("-readconfig")
            .arg(&record.config_path);
        debug!(exec = %self.hypervisor_exec.display(), "Spawning hypervisor");
        let child = command.spawn().map_err(|err| {
            metrics::counter!("kvm_domain_start_failures_total", "reason" => "spawn").increment(1);
            KvmError::ProcessSpawn {
                domain: domain.to_string(),
                reason: err.to_string(),
            }
        })?;
        let Some(pid) = child.id() else {
            return Err(KvmError::ProcessSpawn {
                domain: domain.to_string(),
                reason: "hypervisor exited before reporting a pid".to_string(),
            });
        };
        record.child = Some(child);

        let pid_path = paths::pid_record(&self.state_root, domain);
        if let Err(source) = tokio::fs::write(&pid_path, format!("{pid}\n")).await {
            self.abort_start(&mut record, domain).await;
            return Err(KvmError::Io {
                path: pid_path,
                source,
            });
        }

        let deadline = started + timeout;
        let sockets = [
            paths::qmp_socket(&self.state_root, domain),
            paths::console_socket(&self.state_root, domain),
        ];
        for socket in &sockets {
            if let Err(err) = self.wait_for_socket(domain, socket, deadline, timeout).await {
                self.abort_start(&mut record, domain).await;
                return Err(err);
            }
        }

        record.state = DomainState::Running;
        record.pid = Some(pid);
        metrics::counter!("kvm_domains_started_total").increment(1);
        metrics::histogram!("kvm_domain_start_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        info!(pid, duration_ms = started.elapsed().as_millis() as u64, "Domain started");
        Ok(())
    }

    /// Shut `domain` down.
    ///
    /// The graceful path asks the monitor to power the guest down and waits
    /// up to `timeout` for the process to exit; `force` (or a missed
    /// timeout) kills it outright. Stopping a domain that is not running is
    /// a no-op.
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn stop(&self, domain: &str, timeout: Duration, force: bool) -> Result<()> {
        info!(force, "Stopping domain");
        let record = self.lookup(domain).await?;
        let mut record = record.lock().await;
        if record.state != DomainState::Running {
            debug!(state = %record.state, "Domain has no running hypervisor");
            return Ok(());
        }
        let Some(mut child) = record.child.take() else {
            record.state = DomainState::Stopped;
            return Ok(());
        };

        let mut exited = false;
        if !force {
            let socket = paths::qmp_socket(&self.state_root, domain);
            if let Err(err) = monitor::send_shutdown(&socket).await {
                debug!(error = %err, "Shutdown request failed, signaling instead");
                if let Some(pid) = record.pid {
                    process::terminate(pid);
                }
            }
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(%status, "Hypervisor exited");
                    exited = true;
                }
                Ok(Err(err)) => warn!(error = %err, "Could not await hypervisor exit"),
                Err(_) => {
                    metrics::counter!("kvm_domain_stop_timeouts_total").increment(1);
                    warn!("Graceful shutdown timed out, killing hypervisor");
                }
            }
        }
        if !exited {
            match record.pid {
                Some(pid) => {
                    process::kill(pid);
                    if let Err(err) = child.wait().await {
                        warn!(error = %err, "Could not reap hypervisor");
                    }
                }
                None => {
                    if let Err(err) = child.kill().await {
                        debug!(error = %err, "Hypervisor already gone");
                    }
                }
            }
        }

        record.state = DomainState::Stopped;
        metrics::counter!("kvm_domains_stopped_total").increment(1);
        info!("Domain stopped");
        Ok(())
    }

    /// Remove `domain` from the registry and delete its runtime state.
    ///
    /// Refused while the domain is running; stop it first.
    #[instrument(skip(self), fields(domain = %domain))]
    pub async fn delete(&self, domain: &str) -> Result<()> {
        info!("Deleting domain");
        let mut domains = self.domains.write().await;
        let record = domains
            .get(domain)
            .ok_or_else(|| KvmError::DomainNotFound {
                domain: domain.to_string(),
            })?;
        {
            let record = record.lock().await;
            if record.state == DomainState::Running {
                return Err(KvmError::StateConflict {
                    domain: domain.to_string(),
                    reason: "domain is running, stop it before deleting".to_string(),
                });
            }
        }

        let dir = paths::domain_dir(&self.state_root, domain);
        if let Err(source) = tokio::fs::remove_dir_all(&dir).await {
            if source.kind() != std::io::ErrorKind::NotFound {
                return Err(KvmError::Io { path: dir, source });
            }
        }
        domains.remove(domain);

        metrics::counter!("kvm_domains_deleted_total").increment(1);
        info!("Domain deleted");
        Ok(())
    }

    /// Current lifecycle state of `domain`.
    pub async fn domain_state(&self, domain: &str) -> Result<DomainState> {
        let record = self.lookup(domain).await?;
        let state = record.lock().await.state;
        Ok(state)
    }

    /// Registry identifier assigned to `domain` when it was created.
    pub async fn domain_id(&self, domain: &str) -> Result<u32> {
        let record = self.lookup(domain).await?;
        let id = record.lock().await.id;
        Ok(id)
    }

    /// Names of all registered domains.
    pub async fn tracked_domains(&self) -> Vec<String> {
        self.domains.read().await.keys().cloned().collect()
    }

    /// Aggregate resource usage for every registered domain.
    ///
    /// Domains whose provider query fails are skipped, so one broken cgroup
    /// cannot hide the rest of the fleet.
    #[instrument(skip(self, provider))]
    pub async fn get_doms_cpu_mem(
        &self,
        provider: Arc<dyn MetricsProvider>,
    ) -> Result<HashMap<String, UsageSnapshot>> {
        let domains = self.tracked_domains().await;
        Ok(stats::collect_usage(domains, provider).await)
    }

    async fn lookup(&self, domain: &str) -> Result<Arc<Mutex<DomainRecord>>> {
        self.domains
            .read()
            .await
            .get(domain)
            .cloned()
            .ok_or_else(|| KvmError::DomainNotFound {
                domain: domain.to_string(),
            })
    }

    /// Roll a failed start back to the created state: reap the child and
    /// drop the pid record.
    async fn abort_start(&self, record: &mut DomainRecord, domain: &str) {
        if let Some(mut child) = record.child.take() {
            if let Err(err) = child.kill().await {
                debug!(error = %err, "Hypervisor already gone during rollback");
            }
        }
        let pid_path = paths::pid_record(&self.state_root, domain);
        if let Err(err) = tokio::fs::remove_file(&pid_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %err, "Could not drop pid record during rollback");
            }
        }
    }

    /// Poll until `socket` exists. The hypervisor creates its sockets once
    /// the machine is up, so existence is the readiness signal.
    async fn wait_for_socket(
        &self,
        domain: &str,
        socket: &Path,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<()> {
        loop {
            if socket.exists() {
                debug!(socket = %socket.display(), "Control socket ready");
                return Ok(());
            }
            if Instant::now() >= deadline {
                metrics::counter!("kvm_domain_start_failures_total", "reason" => "socket_timeout")
                    .increment(1);
                return Err(KvmError::SocketTimeout {
                    domain: domain.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
        }
    }
}
