//! KVM backend for the domainmgr edge virtualization manager.
//!
//! Translates hypervisor-agnostic domain descriptors into the readconfig
//! documents QEMU boots from, drives each domain through its lifecycle and
//! aggregates per-domain resource usage from a pluggable metrics provider.

pub mod conf;
pub mod domain;
pub mod error;
pub mod pci;
pub mod stats;
pub mod types;

mod paths;

// Re-export commonly used items
pub use conf::doc::{ConfigDocument, Section};
pub use domain::{DomainState, KvmContext};
pub use error::{KvmError, Result};
pub use stats::{CgroupMetricsProvider, MetricsProvider, ResourceMetrics, UsageSnapshot};
pub use types::{
    AdapterPool, DiskDevtype, DiskEntry, DiskFormat, IoAdapterKind, IoAdapterRequest, IoBundle,
    MachineModel, NetworkInterface, VirtMode, VmDescriptor,
};
