//! Domain descriptor types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{KvmError, Result};
use crate::types::adapters::IoAdapterRequest;

/// Hypervisor-agnostic description of one domain, as produced by the
/// surrounding manager.
///
/// The descriptor is treated as immutable input: configuration synthesis
/// reads it, validates it, and never writes it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmDescriptor {
    /// Stable identity of the domain across its whole life
    pub uuid: Uuid,

    /// Descriptor format version
    pub version: String,

    /// Guest kernel image, required for every boot mode
    pub kernel: Option<PathBuf>,

    /// Optional guest ramdisk; omitted from the rendered config when absent
    pub ramdisk: Option<PathBuf>,

    /// Extra kernel command line arguments; omitted when empty
    pub extra_args: String,

    /// Guest memory size in bytes
    pub memory_bytes: u64,

    /// Number of virtual CPUs
    pub vcpus: u32,

    /// VNC display index, consumed by the manager's display proxy
    pub vnc_display: u32,

    /// VNC password, consumed by the manager's display proxy
    pub vnc_passwd: String,

    /// Requested virtualization mode
    pub mode: VirtMode,

    /// Network interfaces in attachment order; the order fixes both the
    /// PCI slot and the `netN` device naming
    pub vifs: Vec<NetworkInterface>,

    /// IO adapter passthrough requests, resolved against the host pool
    pub io_adapters: Vec<IoAdapterRequest>,
}

impl VmDescriptor {
    /// Check the fields every rendered configuration depends on.
    ///
    /// Called before any filesystem or process mutation so a bad descriptor
    /// never leaves partial state behind.
    pub fn validate(&self, domain: &str) -> Result<()> {
        let kernel_missing = match &self.kernel {
            Some(path) => path.as_os_str().is_empty(),
            None => true,
        };
        if kernel_missing {
            return Err(KvmError::Validation {
                domain: domain.to_string(),
                reason: "descriptor has no kernel image".to_string(),
            });
        }
        if self.memory_bytes == 0 {
            return Err(KvmError::Validation {
                domain: domain.to_string(),
                reason: "descriptor has zero memory".to_string(),
            });
        }
        if self.vcpus == 0 {
            return Err(KvmError::Validation {
                domain: domain.to_string(),
                reason: "descriptor has zero vcpus".to_string(),
            });
        }
        Ok(())
    }
}

/// Virtualization mode requested for a domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VirtMode {
    /// Legacy paravirtualized guests
    #[default]
    Pv,

    /// Full-machine-legacy guests; rendered identically to `Pv`
    Fml,

    /// Hardware-assisted fully virtualized guests
    Hvm,
}

impl fmt::Display for VirtMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pv => write!(f, "pv"),
            Self::Fml => write!(f, "fml"),
            Self::Hvm => write!(f, "hvm"),
        }
    }
}

/// One guest network interface backed by a host tap device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Host bridge the tap device is enslaved to
    pub bridge: String,

    /// Guest-visible MAC address
    pub mac: String,

    /// Host-side interface name of the tap device
    pub vif: String,
}

/// Supported machine models, one per architecture target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineModel {
    /// x86-64 Q35 machine
    X86Q35,

    /// 64-bit ARM virt machine
    ArmVirt,
}

impl MachineModel {
    /// Machine type string rendered into the `[machine]` section.
    pub fn machine_type(&self) -> &'static str {
        match self {
            Self::X86Q35 => "pc-q35-3.1",
            Self::ArmVirt => "virt",
        }
    }

    /// Hypervisor executable launched for this model.
    pub fn hypervisor_exec(&self) -> &'static str {
        match self {
            Self::X86Q35 => "qemu-system-x86_64",
            Self::ArmVirt => "qemu-system-aarch64",
        }
    }

    /// True for the ARM machine, which drops the x86-only preamble sections
    /// and attaches CDROMs over USB instead of the IDE bus.
    pub fn is_arm(&self) -> bool {
        matches!(self, Self::ArmVirt)
    }
}

impl fmt::Display for MachineModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.machine_type())
    }
}
