//! Error types for the KVM backend.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for KVM backend operations.
pub type Result<T> = std::result::Result<T, KvmError>;

/// Main error type for the KVM backend.
#[derive(Error, Debug)]
pub enum KvmError {
    /// Domain descriptor or adapter resolution rejected before any mutation
    #[error("Invalid configuration for domain {domain}: {reason}")]
    Validation { domain: String, reason: String },

    /// The root bus ran out of device slots
    #[error("No free root-bus slot for {device}: all {limit} device slots in use")]
    TopologyExhausted { device: String, limit: usize },

    /// Operation not allowed in the domain's current lifecycle state
    #[error("Domain {domain}: {reason}")]
    StateConflict { domain: String, reason: String },

    /// Name is not present in the registry
    #[error("Domain not found: {domain}")]
    DomainNotFound { domain: String },

    /// The hypervisor process could not be spawned
    #[error("Failed to spawn hypervisor for domain {domain}: {reason}")]
    ProcessSpawn { domain: String, reason: String },

    /// Control sockets did not appear in time after spawning
    #[error("Control sockets for domain {domain} not ready within {timeout:?}")]
    SocketTimeout { domain: String, timeout: Duration },

    /// A metrics provider call failed
    #[error("Metrics provider error: {reason}")]
    MetricsProvider { reason: String },

    /// Runtime-state filesystem operation failed
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Catch-all for unexpected errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KvmError {
    /// Create an internal error from a string message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Other(anyhow::anyhow!(msg.into()))
    }
}
