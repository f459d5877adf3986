//! Cgroup v1 handlers.

use std::path::{Path, PathBuf};

use nodeboot_common::constants::{CGROUP_ROOT, CGROUP_SYSTEMD};
use nodeboot_common::error::Result;

use super::misc;
use super::subsystem::{self, Subsystem};
use crate::filesystem::mount::Propagation;
use crate::host::Host;

/// Hierarchies worth a kubelet root, read after `misc` is gone.
fn current_subsystems(host: &Host<'_>) -> Result<Vec<Subsystem>> {
    Ok(subsystem::discover(&host.mounter.mount_table()?)
        .into_iter()
        .filter(|s| s.name() != "misc")
        .collect())
}

/// kubelet's systemd driver expects `kubelet.slice` in a `systemd`
/// hierarchy even when the host does not run systemd.
fn ensure_systemd_slice(host: &Host<'_>, subsystems: &[Subsystem]) -> Result<()> {
    if subsystems.iter().any(|s| s.name() == "systemd") {
        return Ok(());
    }
    tracing::debug!("no systemd hierarchy, creating kubelet.slice explicitly");
    subsystem::mount_kubelet_root(host, Path::new(CGROUP_SYSTEMD), "/kubelet.slice")
}

/// Cgroup v1 inside a private cgroup namespace.
///
/// Every hierarchy is already rooted at the container's own cgroup, so only
/// the kubelet roots are needed.
///
/// # Errors
///
/// Returns an error if a kubelet root cannot be created or mounted.
pub fn reconcile_namespaced(host: &Host<'_>) -> Result<()> {
    misc::remove(host);
    let subsystems = current_subsystems(host)?;
    subsystem::mount_kubelet_roots(host, &subsystems)?;
    ensure_systemd_slice(host, &subsystems)
}

/// Cgroup v1 sharing the host's cgroup namespace.
///
/// The engine bound the container's cgroup (`current`) at each hierarchy
/// root, but `/proc/<pid>/cgroup` still reports the full host path. Binding
/// each hierarchy onto `<mount point><current>` makes both views agree.
///
/// # Errors
///
/// Returns an error if a required bind mount or kubelet root fails.
pub fn reconcile_legacy(host: &Host<'_>, current: &str) -> Result<()> {
    tracing::warn!(
        "cgroup v1 without cgroupns is deprecated, run the node with a private \
         cgroup namespace or on a cgroup v2 host"
    );

    // An empty current cgroup marks nothing as stale.
    let captured = subsystem::discover(&host.mounter.mount_table()?);
    for stale in captured
        .iter()
        .filter(|s| !current.is_empty() && !s.root.starts_with(current))
    {
        tracing::debug!(mount_point = %stale.mount_point.display(), root = %stale.root, "dropping unscoped hierarchy");
        if let Err(e) = host.mounter.unmount(&stale.mount_point) {
            tracing::warn!(mount_point = %stale.mount_point.display(), error = %e, "failed to unmount hierarchy");
        }
        if let Err(e) = host.sysroot.remove_dir(&stale.mount_point) {
            tracing::warn!(mount_point = %stale.mount_point.display(), error = %e, "failed to remove hierarchy directory");
        }
    }

    misc::remove(host);

    let subsystems = current_subsystems(host)?;
    let scoped: Vec<&Subsystem> = subsystems.iter().filter(|s| s.root != "/").collect();
    if let Some(mount_root) = scoped.first().map(|s| s.root.clone()) {
        for subsystem in &scoped {
            let target = nested(&subsystem.mount_point, &mount_root);
            if host.mounter.is_mount_point(&target)? {
                continue;
            }
            host.sysroot.create_dir_all(&target)?;
            host.mounter.bind(&subsystem.mount_point, &target)?;
        }
    }

    host.mounter
        .set_propagation(Path::new(CGROUP_ROOT), Propagation::Private)?;
    subsystem::mount_kubelet_roots(host, &subsystems)?;
    ensure_systemd_slice(host, &subsystems)
}

fn nested(mount_point: &Path, cgroup: &str) -> PathBuf {
    mount_point.join(cgroup.trim_start_matches('/'))
}

/// Staged cgroup v1 layouts shared by the cgroup tests.
#[cfg(test)]
pub mod tests_support {
    use crate::filesystem::mountinfo::MountEntry;
    use crate::sysroot::Sysroot;

    /// Hierarchies mounted in the staged layouts.
    pub const HIERARCHIES: &[&str] = &["cpuset", "cpu,cpuacct", "memory", "pids", "systemd"];

    /// A cgroup v1 mount of `name` bound from `root`.
    pub fn cgroup_entry(root: &str, name: &str) -> MountEntry {
        MountEntry {
            root: root.into(),
            mount_point: format!("/sys/fs/cgroup/{name}").into(),
            fs_type: "cgroup".into(),
            source: "cgroup".into(),
            super_options: format!("rw,{name}"),
        }
    }

    /// Mount table as seen inside a private cgroup namespace.
    pub fn namespaced_table() -> Vec<MountEntry> {
        HIERARCHIES.iter().map(|h| cgroup_entry("/", h)).collect()
    }

    /// Creates the hierarchy directories and cpuset values.
    pub fn stage_hierarchies(root: &Sysroot) {
        for h in HIERARCHIES {
            root.create_dir_all(format!("/sys/fs/cgroup/{h}"))
                .expect("hierarchy dir");
        }
        root.write("/sys/fs/cgroup/cpuset/cpuset.cpus", "0-3\n")
            .expect("cpus");
        root.write("/sys/fs/cgroup/cpuset/cpuset.mems", "0\n")
            .expect("mems");
    }
}
