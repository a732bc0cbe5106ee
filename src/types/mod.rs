//! Core types shared across the KVM backend.

pub mod adapters;
pub mod disk;
pub mod vm;

pub use adapters::{AdapterPool, IoAdapterKind, IoAdapterRequest, IoBundle};
pub use disk::{DiskDevtype, DiskEntry, DiskFormat};
pub use vm::{MachineModel, NetworkInterface, VirtMode, VmDescriptor};
