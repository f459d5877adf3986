//! Cgroup v1 hierarchy discovery and the kubelet root mounts.

use std::path::{Path, PathBuf};

use nodeboot_common::constants::{CGROUP_ROOT, KUBELET_CGROUP_ROOTS};
use nodeboot_common::error::Result;

use crate::filesystem::mountinfo::MountEntry;
use crate::host::Host;

/// A mounted cgroup v1 hierarchy such as `/sys/fs/cgroup/cpu,cpuacct`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subsystem {
    /// Where the hierarchy is mounted.
    pub mount_point: PathBuf,
    /// Cgroup path the container engine bound at the mount point.
    pub root: String,
}

impl Subsystem {
    /// Hierarchy name, the last component of the mount point.
    #[must_use]
    pub fn name(&self) -> &str {
        self.mount_point
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Whether this hierarchy carries the `cpuset` controller.
    #[must_use]
    pub fn is_cpuset(&self) -> bool {
        carries_cpuset(&self.mount_point)
    }
}

fn carries_cpuset(mount_point: &Path) -> bool {
    mount_point
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.split(',').any(|c| c == "cpuset"))
}

/// Lists cgroup v1 hierarchies mounted directly under `/sys/fs/cgroup`.
///
/// Nested cgroup mounts are the bind mounts this module creates itself and
/// are excluded, which keeps repeated runs from stacking binds.
#[must_use]
pub fn discover(table: &[MountEntry]) -> Vec<Subsystem> {
    let root = Path::new(CGROUP_ROOT);
    let mut found: Vec<Subsystem> = Vec::new();
    for entry in table.iter().filter(|e| e.is_cgroup_v1()) {
        if entry.mount_point.parent() != Some(root) {
            continue;
        }
        if found.iter().any(|s| s.mount_point == entry.mount_point) {
            continue;
        }
        found.push(Subsystem {
            mount_point: entry.mount_point.clone(),
            root: entry.root.clone(),
        });
    }
    found
}

/// Creates `cgroup_root` inside `subsystem` and pins it with a self bind
/// mount so systemd cannot remove it before kubelet starts.
///
/// # Errors
///
/// Returns an error if the directory, cpuset values or bind mount cannot be
/// set up.
pub fn mount_kubelet_root(host: &Host<'_>, subsystem: &Path, cgroup_root: &str) -> Result<()> {
    let target = subsystem.join(cgroup_root.trim_start_matches('/'));
    host.sysroot.create_dir_all(&target)?;

    if carries_cpuset(subsystem) {
        // An empty cpuset makes every later task assignment fail with ENOSPC.
        for file in ["cpuset.cpus", "cpuset.mems"] {
            let value = host.sysroot.read_to_string(subsystem.join(file))?;
            host.sysroot.write(target.join(file), value)?;
        }
    }

    if host.mounter.is_mount_point(&target)? {
        tracing::debug!(target = %target.display(), "kubelet cgroup root already mounted");
        return Ok(());
    }
    host.mounter.bind(&target, &target)
}

/// Mounts every kubelet root in every subsystem.
///
/// # Errors
///
/// Returns the first failure.
pub fn mount_kubelet_roots(host: &Host<'_>, subsystems: &[Subsystem]) -> Result<()> {
    for subsystem in subsystems {
        for cgroup_root in KUBELET_CGROUP_ROOTS {
            mount_kubelet_root(host, &subsystem.mount_point, cgroup_root)?;
        }
    }
    Ok(())
}
