//! Well-known paths, thresholds and names.
//!
//! Every path here is absolute as seen from inside the node container. The
//! reconcilers resolve them through a sysroot so tests can stage a fake tree.

use std::time::Duration;

/// Private per-container state directory. Markers survive container restarts.
pub const STATE_DIR: &str = "/kind";

/// Marker holding the IPv4 address observed on the previous boot.
pub const OLD_IPV4_MARKER: &str = "/kind/old-ipv4";
/// Marker holding the IPv6 address observed on the previous boot.
pub const OLD_IPV6_MARKER: &str = "/kind/old-ipv6";
/// Stable product UUID for this container.
pub const PRODUCT_UUID_MARKER: &str = "/kind/product_uuid";
/// Source file for the product name override.
pub const PRODUCT_NAME_MARKER: &str = "/kind/product_name";
/// Synthetic `/proc/cgroups` listing without the `misc` controller.
pub const SYNTHETIC_CGROUPS: &str = "/kind/cgroups";
/// kubeadm configuration used to regenerate serving certificates.
pub const KUBEADM_CONFIG: &str = "/kind/kubeadm.conf";

/// Value written over the DMI product name.
pub const PRODUCT_NAME: &str = "kind";

/// Product name exposure path.
pub const DMI_PRODUCT_NAME: &str = "/sys/class/dmi/id/product_name";
/// Product UUID exposure paths, legacy class link first.
pub const DMI_PRODUCT_UUID_PATHS: &[&str] = &[
    "/sys/class/dmi/id/product_uuid",
    "/sys/devices/virtual/dmi/id/product_uuid",
];

/// systemd machine identity.
pub const MACHINE_ID: &str = "/etc/machine-id";

/// Kernel user-namespace UID mapping table.
pub const UID_MAP: &str = "/proc/self/uid_map";
/// cgroup membership of the current process.
pub const PROC_SELF_CGROUP: &str = "/proc/self/cgroup";
/// Mount table of the current process.
pub const PROC_SELF_MOUNTINFO: &str = "/proc/self/mountinfo";
/// Kernel list of cgroup v1 controllers.
pub const PROC_CGROUPS: &str = "/proc/cgroups";

/// cgroup filesystem mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";
/// Present only on the cgroup v2 unified hierarchy.
pub const CGROUP_V2_CONTROLLERS: &str = "/sys/fs/cgroup/cgroup.controllers";
/// The `misc` controller mount removed on cgroup v1.
pub const CGROUP_MISC: &str = "/sys/fs/cgroup/misc";
/// The `systemd` named hierarchy on cgroup v1.
pub const CGROUP_SYSTEMD: &str = "/sys/fs/cgroup/systemd";
/// cgroup roots handed to the kubelet.
pub const KUBELET_CGROUP_ROOTS: &[&str] = &["/kubelet", "/kubelet.slice"];
/// Controllers kubelet needs delegated under a user namespace.
pub const REQUIRED_CONTROLLERS: &[&str] = &["cpu", "memory", "pids"];

/// Security context of the running process.
pub const PROC_SELF_ATTR_CURRENT: &str = "/proc/self/attr/current";
/// Present on Ubuntu kernels patched to allow overlay mounts in a userns.
pub const OVERLAY_PERMIT_USERNS: &str = "/sys/module/overlay/parameters/permit_mounts_in_userns";

/// Minimum `RLIMIT_NOFILE` hard limit expected under a user namespace.
pub const MIN_NOFILE_HARD_LIMIT: u64 = 64_000;

/// containerd configuration.
pub const CONTAINERD_CONFIG: &str = "/etc/containerd/config.toml";
/// Snapshotter containerd ships with.
pub const DEFAULT_SNAPSHOTTER: &str = "overlayfs";
/// Unit that serves the fuse-overlayfs snapshotter.
pub const FUSE_OVERLAYFS_UNIT: &str = "containerd-fuse-overlayfs";

/// systemd manager drop-in for default service environment.
pub const PROXY_DROPIN: &str = "/etc/systemd/system.conf.d/proxy-default-environment.conf";

/// Kernel log device.
pub const DEV_KMSG: &str = "/dev/kmsg";
/// Console device used as a kmsg stand-in.
pub const DEV_CONSOLE: &str = "/dev/console";
/// Null device.
pub const DEV_NULL: &str = "/dev/null";
/// Restricts unprivileged reads of the kernel log.
pub const DMESG_RESTRICT: &str = "/proc/sys/kernel/dmesg_restrict";

/// Resolver configuration.
pub const RESOLV_CONF: &str = "/etc/resolv.conf";
/// Copy of the resolver configuration as the container engine wrote it.
pub const RESOLV_CONF_ORIGINAL: &str = "/etc/resolv.conf.original";
/// Docker's embedded DNS server.
pub const DOCKER_EMBEDDED_DNS: &str = "127.0.0.11";
/// Hostnames container engines publish for the host, in preference order.
pub const HOST_GATEWAY_NAMES: &[&str] = &["host.docker.internal", "host.containers.internal"];

/// Files that may embed the node's own address.
pub const ADDRESS_TRACKED_FILES: &[&str] = &[
    "/etc/kubernetes/manifests/etcd.yaml",
    "/etc/kubernetes/manifests/kube-apiserver.yaml",
    "/etc/kubernetes/manifests/kube-controller-manager.yaml",
    "/etc/kubernetes/manifests/kube-scheduler.yaml",
    "/etc/kubernetes/controller-manager.conf",
    "/etc/kubernetes/scheduler.conf",
    "/etc/kubernetes/super-admin.conf",
    "/kind/kubeadm.conf",
    "/var/lib/kubelet/kubeadm-flags.env",
];

/// API server serving certificate.
pub const APISERVER_CERT: &str = "/etc/kubernetes/pki/apiserver.crt";
/// API server serving key.
pub const APISERVER_KEY: &str = "/etc/kubernetes/pki/apiserver.key";

/// Bound on lookups and probes that can hang on unsupported hosts.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts made at the cgroup fixup before giving up.
pub const CGROUP_FIX_ATTEMPTS: u32 = 11;
/// Pause between cgroup fixup attempts.
pub const CGROUP_FIX_DELAY: Duration = Duration::from_secs(1);
/// Exit status used when the cgroup fixup never succeeds.
pub const CGROUP_FIX_EXIT_CODE: i32 = 31;
