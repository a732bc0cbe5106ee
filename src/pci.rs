//! Root-bus slot allocation.
//!
//! Every rendered device either sits directly on the PCIe root complex or
//! behind its own `pcie-root-port` bridge. Slots are handed out strictly in
//! request order, so the synthesized topology is a pure function of the
//! descriptor's device lists.

use crate::error::{KvmError, Result};

/// Number of addressable slots on the root bus. Slot 0 belongs to the host
/// bridge and is never handed out.
const SLOT_LIMIT: usize = 32;

/// Root-bus address of the console virtio-serial device. The slot counter
/// never lands here; the device is rendered with the fixed preamble.
const CONSOLE_SLOT: usize = 3;

/// Downstream port numbers start at this offset plus the slot number.
const PORT_BASE: usize = 10;

/// A `pcie-root-port` bridge placement for one device.
///
/// The bridged device attaches to the downstream bus at function 0; the
/// bridge itself occupies `slot` on the root complex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgePort {
    /// Root-bus slot of the bridge
    pub slot: usize,

    /// Downstream port number
    pub port: usize,

    /// Chassis number exposed to the guest
    pub chassis: usize,

    /// Whether the bridge is rendered with multifunction on
    pub multifunction: bool,
}

impl BridgePort {
    /// Bus name the bridged device attaches to.
    pub fn downstream_bus(&self) -> String {
        format!("pci.{}", self.slot)
    }
}

/// Hands out root-bus slots in request order.
///
/// One allocator lives for the duration of a single synthesis call; nothing
/// is shared across domains.
#[derive(Debug)]
pub struct SlotAllocator {
    next_slot: usize,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self { next_slot: 1 }
    }

    fn take_slot(&mut self, device: &str) -> Result<usize> {
        let slot = self.next_slot;
        if slot >= SLOT_LIMIT {
            return Err(KvmError::TopologyExhausted {
                device: device.to_string(),
                limit: SLOT_LIMIT - 1,
            });
        }
        self.next_slot += 1;
        if self.next_slot == CONSOLE_SLOT {
            self.next_slot += 1;
        }
        Ok(slot)
    }

    /// Place a device directly on the root complex.
    pub fn direct(&mut self, device: &str) -> Result<usize> {
        self.take_slot(device)
    }

    /// Place a device behind its own root port.
    pub fn bridged(&mut self, device: &str, multifunction: bool) -> Result<BridgePort> {
        let slot = self.take_slot(device)?;
        Ok(BridgePort {
            slot,
            port: PORT_BASE + slot,
            chassis: slot,
            multifunction,
        })
    }
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_sequential_and_skip_the_console() {
        let mut slots = SlotAllocator::new();

        assert_eq!(slots.direct("video").unwrap(), 1);
        let usb = slots.bridged("usb", false).unwrap();
        assert_eq!(usb.slot, 2);
        // slot 3 belongs to the console; the first dynamic device gets 4
        let disk = slots.bridged("disk", false).unwrap();
        assert_eq!(disk.slot, 4);
        assert_eq!(slots.direct("share").unwrap(), 5);
    }

    #[test]
    fn bridge_numbering_derives_from_the_slot() {
        let mut slots = SlotAllocator::new();
        slots.direct("video").unwrap();
        slots.bridged("usb", false).unwrap();

        let disk = slots.bridged("disk", false).unwrap();
        assert_eq!(disk.port, 14);
        assert_eq!(disk.chassis, 4);
        assert_eq!(disk.downstream_bus(), "pci.4");
        assert!(!disk.multifunction);

        let net = slots.bridged("net", true).unwrap();
        assert_eq!(net.port, 15);
        assert_eq!(net.chassis, 5);
        assert!(net.multifunction);
    }

    #[test]
    fn allocation_fails_when_the_bus_is_full() {
        let mut slots = SlotAllocator::new();
        let mut granted = 0;
        loop {
            match slots.direct("disk") {
                Ok(_) => granted += 1,
                Err(err) => {
                    assert!(matches!(err, KvmError::TopologyExhausted { .. }));
                    break;
                }
            }
        }
        // 31 device slots minus the reserved console slot
        assert_eq!(granted, 30);
    }

    #[test]
    fn later_requests_keep_failing_once_exhausted() {
        let mut slots = SlotAllocator::new();
        while slots.direct("disk").is_ok() {}
        assert!(slots.direct("net").is_err());
        assert!(slots.bridged("net", true).is_err());
    }
}
