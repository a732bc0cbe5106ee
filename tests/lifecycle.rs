//! Integration tests for the domain lifecycle.
//!
//! A tiny shell script stands in for the hypervisor: it creates the control
//! sockets the way a booting machine would and then sleeps until it is shut
//! down. Everything else runs against the real context, registry and
//! runtime-state directories.

use std::path::{Path, PathBuf};
use std::time::Duration;

use domainmgr_kvm::{DomainState, KvmContext, KvmError, MachineModel, VirtMode, VmDescriptor};
use tempfile::TempDir;
use uuid::Uuid;

fn minimal_descriptor() -> VmDescriptor {
    VmDescriptor {
        uuid: Uuid::new_v4(),
        version: "1.0".to_string(),
        kernel: Some(PathBuf::from("/boot/kernel")),
        ramdisk: None,
        extra_args: String::new(),
        memory_bytes: 1024 * 1024,
        vcpus: 1,
        vnc_display: 0,
        vnc_passwd: String::new(),
        mode: VirtMode::Pv,
        vifs: Vec::new(),
        io_adapters: Vec::new(),
    }
}

/// A stand-in hypervisor. When `ready` it creates the control sockets the
/// lifecycle waits for, then blocks like a running machine.
fn write_script(dir: &Path, ready: bool) -> PathBuf {
    let script = dir.join("fake-hypervisor.sh");
    let body = if ready {
        "touch \"$1/qmp\" \"$1/cons\"\nexec sleep 30\n"
    } else {
        "exec sleep 30\n"
    };
    std::fs::write(&script, body).expect("write fake hypervisor");
    script
}

fn test_context(root: &Path, script: &Path, domain: &str) -> KvmContext {
    let args = vec![
        script.display().to_string(),
        root.join(domain).display().to_string(),
    ];
    KvmContext::new(MachineModel::X86Q35)
        .with_state_root(root)
        .with_hypervisor("/bin/sh", args)
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn create_start_stop_delete_roundtrip() {
    let root = TempDir::new().expect("state root");
    let cfg_dir = TempDir::new().expect("config dir");
    let script = write_script(cfg_dir.path(), true);
    let ctx = test_context(root.path(), &script, "test");
    let desc = minimal_descriptor();
    let cfg = cfg_dir.path().join("test.cfg");

    ctx.create_dom_config(
        "test",
        &desc,
        &[],
        &domainmgr_kvm::AdapterPool::default(),
        &cfg,
    )
    .await
    .expect("write config");
    assert!(cfg.exists());

    let id = ctx.create("test", &cfg, &desc).await.expect("create");
    assert!(id >= 1);
    assert_eq!(ctx.domain_id("test").await.expect("id"), id);
    let domain_dir = root.path().join("test");
    assert!(domain_dir.is_dir());
    assert!(dir_entries(&domain_dir).is_empty());
    assert_eq!(
        ctx.domain_state("test").await.expect("state"),
        DomainState::Created
    );

    ctx.start("test", Duration::from_secs(10))
        .await
        .expect("start");
    assert_eq!(
        ctx.domain_state("test").await.expect("state"),
        DomainState::Running
    );
    assert_eq!(dir_entries(&domain_dir), vec!["cons", "pid", "qmp"]);
    let pid: u32 = std::fs::read_to_string(domain_dir.join("pid"))
        .expect("pid record")
        .trim()
        .parse()
        .expect("numeric pid");
    assert!(pid > 0);

    ctx.stop("test", Duration::from_secs(2), true)
        .await
        .expect("stop");
    assert_eq!(
        ctx.domain_state("test").await.expect("state"),
        DomainState::Stopped
    );

    ctx.delete("test").await.expect("delete");
    assert!(!domain_dir.exists());
    assert!(ctx.tracked_domains().await.is_empty());
    assert!(dir_entries(root.path()).is_empty());
}

#[tokio::test]
async fn create_rejects_duplicate_names() {
    let root = TempDir::new().expect("state root");
    let cfg_dir = TempDir::new().expect("config dir");
    let script = write_script(cfg_dir.path(), true);
    let ctx = test_context(root.path(), &script, "test");
    let desc = minimal_descriptor();
    let cfg = cfg_dir.path().join("test.cfg");

    ctx.create("test", &cfg, &desc).await.expect("create");
    let err = ctx.create("test", &cfg, &desc).await.unwrap_err();
    assert!(matches!(err, KvmError::StateConflict { .. }));
}

#[tokio::test]
async fn delete_refuses_a_running_domain() {
    let root = TempDir::new().expect("state root");
    let cfg_dir = TempDir::new().expect("config dir");
    let script = write_script(cfg_dir.path(), true);
    let ctx = test_context(root.path(), &script, "test");
    let desc = minimal_descriptor();
    let cfg = cfg_dir.path().join("test.cfg");

    ctx.create("test", &cfg, &desc).await.expect("create");
    ctx.start("test", Duration::from_secs(10))
        .await
        .expect("start");

    let err = ctx.delete("test").await.unwrap_err();
    assert!(matches!(err, KvmError::StateConflict { .. }));
    assert_eq!(
        ctx.domain_state("test").await.expect("state"),
        DomainState::Running
    );

    ctx.stop("test", Duration::from_secs(2), true)
        .await
        .expect("stop");
    ctx.delete("test").await.expect("delete");
}

#[tokio::test]
async fn stop_is_idempotent_when_nothing_runs() {
    let root = TempDir::new().expect("state root");
    let cfg_dir = TempDir::new().expect("config dir");
    let script = write_script(cfg_dir.path(), true);
    let ctx = test_context(root.path(), &script, "test");
    let desc = minimal_descriptor();
    let cfg = cfg_dir.path().join("test.cfg");

    ctx.create("test", &cfg, &desc).await.expect("create");
    // never started
    ctx.stop("test", Duration::from_secs(1), false)
        .await
        .expect("stop on created domain");

    ctx.start("test", Duration::from_secs(10))
        .await
        .expect("start");
    ctx.stop("test", Duration::from_secs(2), true)
        .await
        .expect("stop");
    // already stopped
    ctx.stop("test", Duration::from_secs(1), true)
        .await
        .expect("stop on stopped domain");
    assert_eq!(
        ctx.domain_state("test").await.expect("state"),
        DomainState::Stopped
    );
}

#[tokio::test]
async fn operations_on_unknown_domains_are_not_found() {
    let root = TempDir::new().expect("state root");
    let cfg_dir = TempDir::new().expect("config dir");
    let script = write_script(cfg_dir.path(), true);
    let ctx = test_context(root.path(), &script, "test");

    assert!(matches!(
        ctx.start("ghost", Duration::from_secs(1)).await.unwrap_err(),
        KvmError::DomainNotFound { .. }
    ));
    assert!(matches!(
        ctx.stop("ghost", Duration::from_secs(1), true).await.unwrap_err(),
        KvmError::DomainNotFound { .. }
    ));
    assert!(matches!(
        ctx.delete("ghost").await.unwrap_err(),
        KvmError::DomainNotFound { .. }
    ));
}

#[tokio::test]
async fn start_rolls_back_when_sockets_never_appear() {
    let root = TempDir::new().expect("state root");
    let cfg_dir = TempDir::new().expect("config dir");
    let script = write_script(cfg_dir.path(), false);
    let ctx = test_context(root.path(), &script, "test");
    let desc = minimal_descriptor();
    let cfg = cfg_dir.path().join("test.cfg");

    ctx.create("test", &cfg, &desc).await.expect("create");
    let err = ctx
        .start("test", Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, KvmError::SocketTimeout { .. }));

    // back in created: no process, no pid record
    assert_eq!(
        ctx.domain_state("test").await.expect("state"),
        DomainState::Created
    );
    assert!(dir_entries(&root.path().join("test")).is_empty());
}

#[tokio::test]
async fn start_surfaces_spawn_failures() {
    let root = TempDir::new().expect("state root");
    let cfg_dir = TempDir::new().expect("config dir");
    let ctx = KvmContext::new(MachineModel::X86Q35)
        .with_state_root(root.path())
        .with_hypervisor(cfg_dir.path().join("missing-hypervisor"), Vec::new());
    let desc = minimal_descriptor();
    let cfg = cfg_dir.path().join("test.cfg");

    ctx.create("test", &cfg, &desc).await.expect("create");
    let err = ctx.start("test", Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, KvmError::ProcessSpawn { .. }));
    assert_eq!(
        ctx.domain_state("test").await.expect("state"),
        DomainState::Created
    );
}

#[tokio::test]
async fn second_start_conflicts_while_running() {
    let root = TempDir::new().expect("state root");
    let cfg_dir = TempDir::new().expect("config dir");
    let script = write_script(cfg_dir.path(), true);
    let ctx = test_context(root.path(), &script, "test");
    let desc = minimal_descriptor();
    let cfg = cfg_dir.path().join("test.cfg");

    ctx.create("test", &cfg, &desc).await.expect("create");
    ctx.start("test", Duration::from_secs(10))
        .await
        .expect("start");

    let err = ctx.start("test", Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, KvmError::StateConflict { .. }));

    ctx.stop("test", Duration::from_secs(2), true)
        .await
        .expect("stop");
}

#[tokio::test]
async fn graceful_stop_falls_back_to_signals() {
    let root = TempDir::new().expect("state root");
    let cfg_dir = TempDir::new().expect("config dir");
    let script = write_script(cfg_dir.path(), true);
    let ctx = test_context(root.path(), &script, "test");
    let desc = minimal_descriptor();
    let cfg = cfg_dir.path().join("test.cfg");

    ctx.create("test", &cfg, &desc).await.expect("create");
    ctx.start("test", Duration::from_secs(10))
        .await
        .expect("start");

    // the qmp path is a plain file, so the monitor request fails and the
    // stop has to fall back to terminating the process
    ctx.stop("test", Duration::from_secs(5), false)
        .await
        .expect("graceful stop");
    assert_eq!(
        ctx.domain_state("test").await.expect("state"),
        DomainState::Stopped
    );
}
