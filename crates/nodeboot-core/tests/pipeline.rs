//! End-to-end runs of the reconciliation pipeline against a staged tree.

use std::time::Duration;

use nodeboot_common::config::NodeConfig;
use nodeboot_common::constants::{
    ADDRESS_TRACKED_FILES, CONTAINERD_CONFIG, OLD_IPV4_MARKER, PRODUCT_UUID_MARKER, RESOLV_CONF,
};
use nodeboot_common::types::{FsType, IptablesMode, Snapshotter};
use nodeboot_core::filesystem::mountinfo::MountEntry;
use nodeboot_core::host::Host;
use nodeboot_core::reconcile::Reconciler;
use nodeboot_core::sysroot::Sysroot;
use nodeboot_core::testing::{RecordingMounter, ScriptedRunner};

const CONTAINERD: &str = r#"version = 2

[plugins."io.containerd.grpc.v1.cri".containerd]
snapshotter = "overlayfs"
"#;

const IPTABLES_DUMP: &str = "\
*nat
:OUTPUT ACCEPT [0:0]
:DOCKER_OUTPUT - [0:0]
-A OUTPUT -d 127.0.0.11/32 -j DOCKER_OUTPUT
-A DOCKER_OUTPUT -d 127.0.0.11/32 -p udp -j DNAT --to-destination 127.0.0.11:53000
COMMIT
";

const HIERARCHIES: &[&str] = &["cpuset", "cpu,cpuacct", "memory", "pids", "systemd"];

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
}

fn cgroup_v1_table() -> Vec<MountEntry> {
    cgroup_table("/")
}

/// Hierarchies as bound by an engine that shares the host cgroup namespace.
fn cgroup_table(root: &str) -> Vec<MountEntry> {
    HIERARCHIES
        .iter()
        .map(|h| MountEntry {
            root: root.into(),
            mount_point: format!("/sys/fs/cgroup/{h}").into(),
            fs_type: "cgroup".into(),
            source: "cgroup".into(),
            super_options: format!("rw,{h}"),
        })
        .collect()
}

/// A namespaced cgroup v1 node on a zfs host.
fn stage_v1_node(root: &Sysroot) {
    root.write("/proc/self/cgroup", "4:cpu,cpuacct:/\n1:name=systemd:/\n")
        .expect("proc cgroup");
    root.write("/proc/cgroups", "#subsys_name\thierarchy\tnum_cgroups\tenabled\nmemory\t5\t1\t1\nmisc\t13\t1\t1\n")
        .expect("proc cgroups");
    for h in HIERARCHIES {
        root.create_dir_all(format!("/sys/fs/cgroup/{h}"))
            .expect("hierarchy");
    }
    root.write("/sys/fs/cgroup/cpuset/cpuset.cpus", "0-1\n")
        .expect("cpus");
    root.write("/sys/fs/cgroup/cpuset/cpuset.mems", "0\n")
        .expect("mems");
    root.write(CONTAINERD_CONFIG, CONTAINERD).expect("containerd");
    root.write(RESOLV_CONF, "search example.org\nnameserver 127.0.0.11\n")
        .expect("resolv");
    root.write("/etc/machine-id", "baked-into-image\n")
        .expect("machine id");
    root.write("/sys/class/dmi/id/product_name", "Host\n")
        .expect("product name");
    root.write("/sys/class/dmi/id/product_uuid", "host-uuid\n")
        .expect("product uuid");
}

/// Replaces the DMI class directory with the kernel's symlink.
fn link_dmi(root: &Sysroot) {
    std::fs::remove_dir_all(root.resolve("/sys/class/dmi/id")).expect("class dir");
    root.write("/sys/devices/virtual/dmi/id/product_name", "Host\n")
        .expect("product name");
    root.write("/sys/devices/virtual/dmi/id/product_uuid", "host-uuid\n")
        .expect("product uuid");
    root.symlink("../../devices/virtual/dmi/id", "/sys/class/dmi/id")
        .expect("symlink");
}

fn scripted_runner(node_ip: &str) -> ScriptedRunner {
    ScriptedRunner::default()
        .respond("systemd-machine-id-setup", "")
        .respond(
            "getent ahostsv4 host.docker.internal",
            "192.168.65.254 STREAM host.docker.internal\n",
        )
        .respond("iptables-save", IPTABLES_DUMP)
        .respond("iptables-restore", "")
        .respond(
            &format!("getent ahostsv4 {}", hostname()),
            &format!("{node_ip} STREAM node\n"),
        )
        .respond("kubeadm init phase certs apiserver --config /kind/kubeadm.conf", "")
}

#[test]
fn cgroup_v1_node_is_fully_reconciled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Sysroot::new(dir.path());
    stage_v1_node(&root);
    let mounter = RecordingMounter::default()
        .with_mounts(cgroup_v1_table())
        .with_fs_type("/kind", FsType::Zfs);
    let runner = scripted_runner("172.18.0.2");
    let config = NodeConfig::default();

    let report = Reconciler::new(Host::new(&root, &mounter, &runner), &config)
        .with_cgroup_retry(1, Duration::ZERO)
        .run()
        .expect("run");

    assert_eq!(report.snapshotter, Some(Snapshotter::Native));
    assert_eq!(report.iptables, IptablesMode::Legacy);
    assert!(
        root.read_to_string(CONTAINERD_CONFIG)
            .expect("containerd")
            .contains("snapshotter = \"native\"")
    );
    for h in HIERARCHIES {
        let kubelet = format!("/sys/fs/cgroup/{h}/kubelet");
        assert!(root.is_dir(&kubelet), "{kubelet} missing");
        assert!(mounter.calls().contains(&format!("bind {kubelet} {kubelet}")));
    }
    assert!(mounter.calls().contains(&"bind-ro /kind/cgroups /proc/cgroups".to_string()));
    assert!(runner.ran("systemd-machine-id-setup"));
    assert_eq!(
        root.read_to_string(RESOLV_CONF).expect("resolv"),
        "search example.org\nnameserver 192.168.65.254\n"
    );
    assert_eq!(root.read_to_string(OLD_IPV4_MARKER).expect("marker"), "172.18.0.2");
}

#[test]
fn second_run_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Sysroot::new(dir.path());
    stage_v1_node(&root);
    let mounter = RecordingMounter::default()
        .with_mounts(cgroup_v1_table())
        .with_fs_type("/kind", FsType::Zfs);
    let runner = scripted_runner("172.18.0.2");
    let config = NodeConfig::default();
    let reconciler = Reconciler::new(Host::new(&root, &mounter, &runner), &config)
        .with_cgroup_retry(1, Duration::ZERO);

    let _ = reconciler.run().expect("first run");
    let binds = mounter.count("bind");
    let containerd = root.read_to_string(CONTAINERD_CONFIG).expect("containerd");
    let uuid = root.read_to_string(PRODUCT_UUID_MARKER).expect("uuid");
    let resolv = root.read_to_string(RESOLV_CONF).expect("resolv");

    let _ = reconciler.run().expect("second run");
    assert_eq!(mounter.count("bind"), binds);
    assert_eq!(root.read_to_string(CONTAINERD_CONFIG).expect("containerd"), containerd);
    assert_eq!(root.read_to_string(PRODUCT_UUID_MARKER).expect("uuid"), uuid);
    assert_eq!(root.read_to_string(RESOLV_CONF).expect("resolv"), resolv);
}

#[test]
fn cgroup_v2_defers_kubelet_root_to_systemd() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Sysroot::new(dir.path());
    root.write("/sys/fs/cgroup/cgroup.controllers", "cpuset cpu io memory pids\n")
        .expect("controllers");
    let mounter = RecordingMounter::default();
    let runner = scripted_runner("172.18.0.2");
    let config = NodeConfig::default();

    let report = Reconciler::new(Host::new(&root, &mounter, &runner), &config)
        .run()
        .expect("run");
    assert_eq!(report.snapshotter, None);
    assert!(!root.exists("/sys/fs/cgroup/kubelet"));
    assert_eq!(mounter.count("bind "), 0);
}

#[test]
fn address_change_rewrites_all_tracked_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Sysroot::new(dir.path());
    root.write("/sys/fs/cgroup/cgroup.controllers", "cpu memory pids\n")
        .expect("controllers");
    root.write(OLD_IPV4_MARKER, "172.18.0.2").expect("marker");
    root.write("/etc/kubernetes/pki/apiserver.crt", "crt").expect("crt");
    root.write("/etc/kubernetes/pki/apiserver.key", "key").expect("key");
    for file in ADDRESS_TRACKED_FILES {
        root.write(file, "ip=172.18.0.2 peer=172.18.0.21 url=https://172.18.0.2:2379\n")
            .expect("tracked file");
    }
    let mounter = RecordingMounter::default();
    let runner = scripted_runner("172.18.0.5");
    let config = NodeConfig::default();

    let _ = Reconciler::new(Host::new(&root, &mounter, &runner), &config)
        .run()
        .expect("run");
    for file in ADDRESS_TRACKED_FILES {
        assert_eq!(
            root.read_to_string(file).expect("tracked file"),
            "ip=172.18.0.5 peer=172.18.0.21 url=https://172.18.0.5:2379\n",
            "{file}"
        );
    }
    assert!(runner.ran("kubeadm init phase certs apiserver --config /kind/kubeadm.conf"));
    assert!(!root.exists("/etc/kubernetes/pki/apiserver.crt"));
}

#[test]
fn lost_ipv4_address_stops_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Sysroot::new(dir.path());
    root.write("/sys/fs/cgroup/cgroup.controllers", "cpu memory pids\n")
        .expect("controllers");
    root.write(OLD_IPV4_MARKER, "172.18.0.2").expect("marker");
    let mounter = RecordingMounter::default();
    let runner = ScriptedRunner::default().respond("systemd-machine-id-setup", "");
    let config = NodeConfig::default();

    let err = Reconciler::new(Host::new(&root, &mounter, &runner), &config)
        .run()
        .expect_err("inconsistent");
    assert!(matches!(
        err,
        nodeboot_common::error::NodebootError::Inconsistent { .. }
    ));
}

#[test]
fn legacy_cgroup_node_is_stable_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Sysroot::new(dir.path());
    stage_v1_node(&root);
    root.write("/proc/self/cgroup", "4:cpu,cpuacct:/docker/abc\n1:name=systemd:/docker/abc\n")
        .expect("proc cgroup");
    let mounter = RecordingMounter::default()
        .rooted(&root)
        .with_mounts(cgroup_table("/docker/abc"));
    let runner = scripted_runner("172.18.0.2");
    let config = NodeConfig::default();
    let reconciler = Reconciler::new(Host::new(&root, &mounter, &runner), &config)
        .with_cgroup_retry(1, Duration::ZERO);

    let _ = reconciler.run().expect("first run");
    assert!(
        mounter
            .calls()
            .contains(&"bind /sys/fs/cgroup/memory /sys/fs/cgroup/memory/docker/abc".to_string())
    );
    let binds = mounter.count("bind");
    let _ = reconciler.run().expect("second run");
    assert_eq!(mounter.count("bind"), binds);
    assert_eq!(mounter.count("umount /sys/fs/cgroup/"), 0);
}

#[test]
fn unknown_current_cgroup_keeps_every_hierarchy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Sysroot::new(dir.path());
    stage_v1_node(&root);
    root.write("/proc/self/cgroup", "1:name=systemd:/docker/abc\n")
        .expect("proc cgroup");
    let mounter = RecordingMounter::default().with_mounts(cgroup_table("/docker/abc"));
    let runner = scripted_runner("172.18.0.2");
    let config = NodeConfig::default();

    let _ = Reconciler::new(Host::new(&root, &mounter, &runner), &config)
        .with_cgroup_retry(1, Duration::ZERO)
        .run()
        .expect("run");
    assert_eq!(mounter.count("umount /sys/fs/cgroup/"), 0);
    for h in HIERARCHIES {
        assert!(root.is_dir(format!("/sys/fs/cgroup/{h}")), "{h} removed");
    }
}

#[test]
fn symlinked_dmi_is_masked_once_across_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Sysroot::new(dir.path());
    stage_v1_node(&root);
    link_dmi(&root);
    let mounter = RecordingMounter::default()
        .rooted(&root)
        .with_mounts(cgroup_v1_table());
    let runner = scripted_runner("172.18.0.2");
    let config = NodeConfig::default();
    let reconciler = Reconciler::new(Host::new(&root, &mounter, &runner), &config)
        .with_cgroup_retry(1, Duration::ZERO);

    let _ = reconciler.run().expect("first run");
    assert_eq!(mounter.count("bind-ro /kind/product_"), 2);
    let _ = reconciler.run().expect("second run");
    assert_eq!(mounter.count("bind-ro /kind/product_"), 2);
}
