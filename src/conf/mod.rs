//! Domain configuration synthesis.
//!
//! Translates a validated descriptor into the readconfig document the
//! hypervisor boots from: machine preamble, control sockets, guest console,
//! video and USB, then the slot-allocated disk and network devices, and
//! finally any passthrough hardware. Section order and blank-line placement
//! are part of the output contract; the manager compares rendered files
//! byte for byte.

pub mod doc;

use std::path::{Path, PathBuf};

use crate::error::{KvmError, Result};
use crate::paths;
use crate::pci::{BridgePort, SlotAllocator};
use crate::types::{AdapterPool, DiskEntry, MachineModel, VmDescriptor};
use doc::{ConfigDocument, Section};

/// Firmware image booted on the x86 machine.
const X86_FIRMWARE: &str = "/usr/lib/xen/boot/ovmf.bin";

/// Host script wiring tap devices into their bridge.
const TAP_SCRIPT: &str = "/etc/xen/scripts/qemu-ifup";

/// Name the guest agent uses to find its console.
const CONSOLE_NAME: &str = "org.lfedge.eve.console.0";

/// Mount tag container shares appear under inside the guest.
const SHARE_MOUNT_TAG: &str = "hostshare";

/// Synthesize the full configuration document for one domain.
///
/// Pure with respect to the host: nothing is written and no processes are
/// touched. Every validation failure surfaces here, before the caller
/// mutates any state.
pub fn build(
    domain: &str,
    desc: &VmDescriptor,
    disks: &[DiskEntry],
    pool: &AdapterPool,
    model: MachineModel,
    state_root: &Path,
) -> Result<ConfigDocument> {
    desc.validate(domain)?;
    let passthrough = resolve_passthrough(domain, desc, pool)?;

    let mut doc = ConfigDocument::new();
    let mut slots = SlotAllocator::new();

    doc.comment("This file is automatically generated by domainmgr");
    doc.section(Section::new("msg").prop("timestamp", "on"));
    doc.blank();

    machine_sections(&mut doc, desc, model);
    doc.section(Section::new("realtime").prop("mlock", "off"));
    doc.blank();

    control_sockets(&mut doc, state_root, domain);

    doc.section(Section::new("memory").prop("size", desc.memory_bytes / 1024));
    doc.blank();
    doc.section(
        Section::new("smp-opts")
            .prop("cpus", desc.vcpus)
            .prop("sockets", 1)
            .prop("cores", desc.vcpus)
            .prop("threads", 1),
    );
    doc.blank();

    guest_console(&mut doc, state_root, domain);
    video_device(&mut doc, &mut slots)?;
    usb_devices(&mut doc, &mut slots)?;
    disk_devices(&mut doc, disks, model, &mut slots)?;
    net_devices(&mut doc, desc, &mut slots)?;
    passthrough_devices(&mut doc, &passthrough);

    Ok(doc)
}

/// `[msg]` and `[machine]` plus the x86-only tuning sections.
fn machine_sections(doc: &mut ConfigDocument, desc: &VmDescriptor, model: MachineModel) {
    let mut machine = Section::new("machine")
        .prop("type", model.machine_type())
        .prop("usb", "off")
        .prop("dump-guest-core", "off");
    machine = if model.is_arm() {
        machine.prop("accel", "kvm:tcg").prop("gic_version", "host")
    } else {
        machine
            .prop("accel", "kvm")
            .prop("vmport", "off")
            .prop("kernel-irqchip", "on")
            .prop("firmware", X86_FIRMWARE)
    };
    if let Some(kernel) = &desc.kernel {
        machine = machine.prop("kernel", kernel.display());
    }
    if let Some(ramdisk) = &desc.ramdisk {
        machine = machine.prop("initrd", ramdisk.display());
    }
    if !desc.extra_args.is_empty() {
        machine = machine.prop("append", &desc.extra_args);
    }
    doc.section(machine);
    doc.blank();
    doc.blank();

    if !model.is_arm() {
        doc.section(
            Section::new("global")
                .prop("driver", "kvm-pit")
                .prop("property", "lost_tick_policy")
                .prop("value", "delay"),
        );
        doc.blank();
        doc.section(
            Section::new("global")
                .prop("driver", "ICH9-LPC")
                .prop("property", "disable_s3")
                .prop("value", 1),
        );
        doc.blank();
        doc.section(
            Section::new("global")
                .prop("driver", "ICH9-LPC")
                .prop("property", "disable_s4")
                .prop("value", 1),
        );
        doc.blank();
        doc.section(
            Section::new("rtc")
                .prop("base", "localtime")
                .prop("driftfix", "slew"),
        );
        doc.blank();
        doc.section(Section::new("device").prop("driver", "intel-iommu"));
        doc.blank();
    }
}

/// Monitor and listener sockets with their `[mon]` frontends.
fn control_sockets(doc: &mut ConfigDocument, state_root: &Path, domain: &str) {
    doc.section(
        Section::labeled("chardev", "charmonitor")
            .prop("backend", "socket")
            .prop("path", paths::qmp_socket(state_root, domain).display())
            .prop("server", "on")
            .prop("wait", "off"),
    );
    doc.blank();
    doc.section(
        Section::labeled("mon", "monitor")
            .prop("chardev", "charmonitor")
            .prop("mode", "control"),
    );
    doc.blank();
    doc.section(
        Section::labeled("chardev", "charlistener")
            .prop("backend", "socket")
            .prop("path", paths::listener_socket(state_root, domain).display())
            .prop("server", "on")
            .prop("wait", "off"),
    );
    doc.blank();
    doc.section(
        Section::labeled("mon", "listener")
            .prop("chardev", "charlistener")
            .prop("mode", "control"),
    );
    doc.blank();
}

/// Guest console on the reserved root-bus address, mirrored to the log
/// stream of the supervising process.
fn guest_console(doc: &mut ConfigDocument, state_root: &Path, domain: &str) {
    doc.section(
        Section::new("device")
            .prop("driver", "virtio-serial")
            .prop("addr", 3),
    );
    doc.blank();
    doc.section(
        Section::labeled("chardev", "charserial0")
            .prop("backend", "socket")
            .prop("path", paths::console_socket(state_root, domain).display())
            .prop("server", "on")
            .prop("wait", "off")
            .prop("logfile", "/dev/fd/1")
            .prop("logappend", "on"),
    );
    doc.blank();
    doc.section(
        Section::new("device")
            .prop("driver", "virtconsole")
            .prop("chardev", "charserial0")
            .prop("name", CONSOLE_NAME),
    );
    doc.blank();
    doc.blank();
}

/// Emulated VGA on the first root-bus slot. The qxl variant is kept in the
/// file, disabled, for guests that are switched over by hand.
fn video_device(doc: &mut ConfigDocument, slots: &mut SlotAllocator) -> Result<()> {
    let slot = slots.direct("video")?;
    doc.commented_section(
        Section::labeled("device", "video0")
            .prop("driver", "qxl-vga")
            .prop("ram_size", 67108864u32)
            .prop("vram_size", 67108864u32)
            .prop("vram64_size_mb", 0)
            .prop("vgamem_mb", 16)
            .prop("max_outputs", 1)
            .prop("bus", "pcie.0")
            .prop("addr", format!("0x{slot}")),
    );
    doc.section(
        Section::labeled("device", "video0")
            .prop("driver", "cirrus-vga")
            .prop("vgamem_mb", 16)
            .prop("bus", "pcie.0")
            .prop("addr", format!("0x{slot}")),
    );
    doc.blank();
    Ok(())
}

/// xHCI controller behind its own root port, plus the tablet device.
fn usb_devices(doc: &mut ConfigDocument, slots: &mut SlotAllocator) -> Result<()> {
    let bridge = slots.bridged("usb controller", false)?;
    doc.section(
        Section::labeled("device", bridge.downstream_bus())
            .prop("driver", "pcie-root-port")
            .prop("port", bridge.port)
            .prop("chassis", bridge.chassis)
            .prop("bus", "pcie.0")
            .prop("addr", format!("0x{}", bridge.slot)),
    );
    doc.blank();
    doc.section(
        Section::labeled("device", "usb")
            .prop("driver", "qemu-xhci")
            .prop("p2", 15)
            .prop("p3", 15)
            .prop("bus", bridge.downstream_bus())
            .prop("addr", "0x0"),
    );
    doc.blank();
    doc.section(
        Section::labeled("device", "input0")
            .prop("driver", "usb-tablet")
            .prop("bus", "usb.0")
            .prop("port", 1),
    );
    doc.blank();
    doc.blank();
    Ok(())
}

/// Disk devices in list order. The list index names every drive and fixes
/// the boot index; only optical media fall outside the slot sequence.
fn disk_devices(
    doc: &mut ConfigDocument,
    disks: &[DiskEntry],
    model: MachineModel,
    slots: &mut SlotAllocator,
) -> Result<()> {
    let mut cdroms = 0;
    for (i, disk) in disks.iter().enumerate() {
        if disk.is_cdrom() {
            doc.section(
                Section::labeled("drive", format!("drive-sata0-{i}"))
                    .prop("file", disk.file_location.display())
                    .prop("format", disk.format.as_str())
                    .prop("if", "none")
                    .prop("media", "cdrom")
                    .prop("readonly", "on"),
            );
            doc.blank();
            let device = Section::labeled("device", format!("sata0-{cdroms}"))
                .prop("drive", format!("drive-sata0-{i}"));
            if model.is_arm() {
                doc.section(device.prop("driver", "usb-storage"));
                doc.blank();
                doc.blank();
            } else {
                doc.section(device.prop("driver", "ide-cd").prop("bus", "ide.0"));
                doc.blank();
            }
            cdroms += 1;
        } else if disk.is_container() {
            let slot = slots.direct("container share")?;
            doc.section(
                Section::labeled("fsdev", format!("fsdev{i}"))
                    .prop("fsdriver", "local")
                    .prop("security_model", "none")
                    .prop("path", disk.file_location.display()),
            );
            doc.blank();
            doc.section(
                Section::labeled("device", format!("fs{i}"))
                    .prop("driver", "virtio-9p-pci")
                    .prop("fsdev", format!("fsdev{i}"))
                    .prop("mount_tag", SHARE_MOUNT_TAG)
                    .prop("addr", slot),
            );
            doc.blank();
            doc.blank();
        } else {
            let bridge = slots.bridged("virtio disk", false)?;
            doc.section(root_port(&bridge));
            doc.blank();
            doc.section(
                Section::labeled("drive", format!("drive-virtio-disk{i}"))
                    .prop("file", disk.file_location.display())
                    .prop("format", disk.format.as_str())
                    .prop("if", "none"),
            );
            doc.blank();
            doc.section(
                Section::labeled("device", format!("virtio-disk{i}"))
                    .prop("driver", "virtio-blk-pci")
                    .prop("scsi", "off")
                    .prop("bus", bridge.downstream_bus())
                    .prop("addr", "0x0")
                    .prop("drive", format!("drive-virtio-disk{i}"))
                    .prop("bootindex", i),
            );
            doc.blank();
            doc.blank();
        }
    }
    Ok(())
}

/// Tap-backed network devices, one multifunction root port each.
fn net_devices(
    doc: &mut ConfigDocument,
    desc: &VmDescriptor,
    slots: &mut SlotAllocator,
) -> Result<()> {
    for (i, vif) in desc.vifs.iter().enumerate() {
        let bridge = slots.bridged("virtio net", true)?;
        doc.section(root_port(&bridge));
        doc.blank();
        doc.section(
            Section::labeled("netdev", format!("hostnet{i}"))
                .prop("type", "tap")
                .prop("ifname", &vif.vif)
                .prop("br", &vif.bridge)
                .prop("script", TAP_SCRIPT)
                .prop("downscript", "no"),
        );
        doc.blank();
        doc.section(
            Section::labeled("device", format!("net{i}"))
                .prop("driver", "virtio-net-pci")
                .prop("netdev", format!("hostnet{i}"))
                .prop("mac", &vif.mac)
                .prop("bus", bridge.downstream_bus())
                .prop("addr", "0x0"),
        );
        doc.blank();
    }
    Ok(())
}

/// Host devices handed through to the guest: vfio entries first, then
/// serial ports. These sections carry no separators of their own.
fn passthrough_devices(doc: &mut ConfigDocument, passthrough: &ResolvedPassthrough) {
    for host in &passthrough.pci_hosts {
        doc.section(
            Section::new("device")
                .prop("driver", "vfio-pci")
                .prop("host", host),
        );
    }
    for (i, path) in passthrough.serials.iter().enumerate() {
        doc.section(
            Section::labeled("chardev", format!("charserial-usr{i}"))
                .prop("backend", "tty")
                .prop("path", path.display()),
        );
        doc.blank();
        doc.section(
            Section::labeled("device", format!("serial-usr{i}"))
                .prop("driver", "isa-serial")
                .prop("chardev", format!("charserial-usr{i}")),
        );
    }
}

fn root_port(bridge: &BridgePort) -> Section {
    let mut section = Section::labeled("device", bridge.downstream_bus())
        .prop("driver", "pcie-root-port")
        .prop("port", bridge.port)
        .prop("chassis", bridge.chassis)
        .prop("bus", "pcie.0");
    if bridge.multifunction {
        section = section.prop("multifunction", "on");
    }
    section.prop("addr", bridge.slot)
}

/// Host resources backing a domain's passthrough requests.
struct ResolvedPassthrough {
    pci_hosts: Vec<String>,
    serials: Vec<PathBuf>,
}

fn resolve_passthrough(
    domain: &str,
    desc: &VmDescriptor,
    pool: &AdapterPool,
) -> Result<ResolvedPassthrough> {
    let mut resolved = ResolvedPassthrough {
        pci_hosts: Vec::new(),
        serials: Vec::new(),
    };
    for request in &desc.io_adapters {
        let bundle = pool
            .resolve(request, desc.uuid)
            .ok_or_else(|| KvmError::Validation {
                domain: domain.to_string(),
                reason: format!(
                    "adapter {} is not reserved for this domain",
                    request.name
                ),
            })?;
        if let Some(pci_long) = &bundle.pci_long {
            resolved.pci_hosts.push(strip_pci_domain(pci_long).to_string());
        } else if let Some(serial) = &bundle.serial {
            resolved.serials.push(serial.clone());
        }
    }
    Ok(resolved)
}

/// The hypervisor wants `bb:ss.f`; inventory records carry the full
/// `dddd:bb:ss.f` form. Addresses without a domain part pass through.
fn strip_pci_domain(pci_long: &str) -> &str {
    match pci_long.matches(':').count() {
        2 => pci_long
            .split_once(':')
            .map_or(pci_long, |(_, rest)| rest),
        _ => pci_long,
    }
}
