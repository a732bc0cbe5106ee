//! Assignable IO adapter inventory.
//!
//! The host owns a pool of passthrough-capable devices (serial ports,
//! physical NICs). Domains request them by logical name; the pool resolves
//! the name to the physical bundle reserved for that domain.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Passthrough device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoAdapterKind {
    /// COM/serial port
    Com,

    /// Physical ethernet port
    Eth,

    /// Any other assignable device
    Other,
}

/// One passthrough request carried in a domain descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoAdapterRequest {
    /// Requested device class
    pub kind: IoAdapterKind,

    /// Logical name, resolved against the adapter pool
    pub name: String,
}

/// One physical IO bundle owned by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoBundle {
    /// Device class of the bundle
    pub kind: IoAdapterKind,

    /// Assignment group; bundles are handed out group-wise
    pub assignment_group: String,

    /// Physical label on the enclosure
    pub phylabel: String,

    /// Host-side interface name
    pub ifname: String,

    /// Serial device path, set for COM bundles
    pub serial: Option<PathBuf>,

    /// Full PCI address `dddd:bb:ss.f`, set for passthrough-capable NICs
    pub pci_long: Option<String>,

    /// Domain currently holding the bundle
    pub used_by: Option<Uuid>,
}

/// Externally-owned inventory of assignable IO bundles.
///
/// The pool is read-only from this backend's point of view; reservation
/// (`used_by`) is decided by the surrounding manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterPool {
    pub bundles: Vec<IoBundle>,
}

impl AdapterPool {
    /// Find bundles matching `name` by assignment group, falling back to a
    /// physical-label or interface-name match when no group matches.
    pub fn lookup(&self, name: &str) -> Vec<&IoBundle> {
        let by_group: Vec<&IoBundle> = self
            .bundles
            .iter()
            .filter(|b| b.assignment_group == name)
            .collect();
        if !by_group.is_empty() {
            return by_group;
        }
        self.bundles
            .iter()
            .filter(|b| b.phylabel == name || b.ifname == name)
            .collect()
    }

    /// Resolve a request to the single bundle reserved for `domain_uuid`.
    ///
    /// Returns `None` when the name matches nothing, when the match is not
    /// reserved for the domain, or when it is ambiguous.
    pub fn resolve(&self, request: &IoAdapterRequest, domain_uuid: Uuid) -> Option<&IoBundle> {
        let reserved: Vec<&IoBundle> = self
            .lookup(&request.name)
            .into_iter()
            .filter(|b| b.used_by == Some(domain_uuid))
            .collect();
        match reserved.as_slice() {
            [bundle] => Some(bundle),
            _ => None,
        }
    }
}
