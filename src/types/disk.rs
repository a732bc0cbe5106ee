//! Disk attachment types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage format of a disk backing location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    /// Copy-on-write image
    Qcow2,

    /// Flat image or ISO
    Raw,

    /// Container rootfs shared into the guest over 9p
    Container,
}

impl DiskFormat {
    /// Format string rendered into drive sections.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qcow2 => "qcow2",
            Self::Raw => "raw",
            Self::Container => "container",
        }
    }
}

/// Device classifier assigned by the volume manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskDevtype {
    /// Writable hard disk
    Hdd,

    /// Pre-created empty hard disk
    HddEmpty,

    /// Read-only optical media
    Cdrom,

    /// No classification; treated as a hard disk unless the format says
    /// otherwise
    Unclassified,
}

/// One disk attachment, in domain disk-list order.
///
/// List order is load-bearing: it fixes the PCI slot sequence, the
/// `virtio-diskN` naming and the guest boot index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskEntry {
    /// Backing file, device node or directory
    pub file_location: PathBuf,

    /// Storage format
    pub format: DiskFormat,

    /// Device classifier
    pub devtype: DiskDevtype,
}

impl DiskEntry {
    /// Container shares render as a 9p filesystem instead of a block device.
    pub fn is_container(&self) -> bool {
        self.format == DiskFormat::Container
    }

    /// CDROMs attach to a fixed secondary bus and never receive a boot index
    /// or a root-bus slot.
    pub fn is_cdrom(&self) -> bool {
        self.devtype == DiskDevtype::Cdrom
    }
}
