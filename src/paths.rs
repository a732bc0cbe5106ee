//! Runtime-state path layout.
//!
//! Each domain owns one directory under the state root. The rendered
//! configuration points the hypervisor at paths inside that directory, so
//! the lifecycle code and the synthesizer must agree on the layout.

use std::path::{Path, PathBuf};

/// Directory holding all runtime state for one domain.
pub(crate) fn domain_dir(state_root: &Path, domain: &str) -> PathBuf {
    state_root.join(domain)
}

/// Primary control socket, served by the hypervisor once it boots.
pub(crate) fn qmp_socket(state_root: &Path, domain: &str) -> PathBuf {
    domain_dir(state_root, domain).join("qmp")
}

/// Secondary control socket kept free for event listeners.
pub(crate) fn listener_socket(state_root: &Path, domain: &str) -> PathBuf {
    domain_dir(state_root, domain).join("listener.qmp")
}

/// Guest console socket.
pub(crate) fn console_socket(state_root: &Path, domain: &str) -> PathBuf {
    domain_dir(state_root, domain).join("cons")
}

/// Record holding the hypervisor process id of a started domain.
pub(crate) fn pid_record(state_root: &Path, domain: &str) -> PathBuf {
    domain_dir(state_root, domain).join("pid")
}
