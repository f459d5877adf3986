//! Removal of the cgroup v1 `misc` controller.
//!
//! Nested runtimes that do not know `misc` leak cgroups in it to the host.
//! The hierarchy is unmounted and `/proc/cgroups` is shadowed by a listing
//! without it so nothing mounts it again. Every step is best effort.

use std::path::Path;

use nodeboot_common::constants::{CGROUP_MISC, PROC_CGROUPS, SYNTHETIC_CGROUPS};

use crate::host::Host;

/// Returns `/proc/cgroups` without the `misc` row, or `None` if it has none.
#[must_use]
pub fn synthetic_listing(proc_cgroups: &str) -> Option<String> {
    let is_misc = |line: &&str| line.split_whitespace().next() == Some("misc");
    if !proc_cgroups.lines().any(|line| is_misc(&line)) {
        return None;
    }
    let mut out: String = proc_cgroups
        .lines()
        .filter(|line| !is_misc(line))
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    Some(out)
}

/// Unmounts and removes `misc`, then masks it in `/proc/cgroups`.
pub fn remove(host: &Host<'_>) {
    let misc = Path::new(CGROUP_MISC);
    if host.sysroot.is_dir(misc) {
        tracing::info!("removing misc controller");
        match host.mounter.is_mount_point(misc) {
            Ok(true) => {
                if let Err(e) = host.mounter.unmount(misc) {
                    tracing::warn!(error = %e, "failed to unmount misc controller");
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "cannot inspect misc controller mount"),
        }
        if let Err(e) = host.sysroot.remove_dir(misc) {
            tracing::warn!(error = %e, "failed to remove misc controller directory");
        }
    }

    let proc_cgroups = Path::new(PROC_CGROUPS);
    if host.mounter.is_mount_point(proc_cgroups).unwrap_or(false) {
        return;
    }
    let listing = match host.sysroot.read_optional(proc_cgroups) {
        Ok(Some(text)) => synthetic_listing(&text),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "cannot read /proc/cgroups");
            None
        }
    };
    let Some(listing) = listing else {
        return;
    };
    let result = host
        .sysroot
        .write(SYNTHETIC_CGROUPS, listing)
        .and_then(|()| {
            host.mounter
                .bind_readonly(Path::new(SYNTHETIC_CGROUPS), proc_cgroups)
        });
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to mask misc in /proc/cgroups");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::mountinfo::MountEntry;
    use crate::sysroot::Sysroot;
    use crate::testing::{RecordingMounter, ScriptedRunner};

    const PROC: &str = "\
#subsys_name\thierarchy\tnum_cgroups\tenabled
cpuset\t2\t4\t1
memory\t5\t90\t1
misc\t13\t1\t1
";

    #[test]
    fn listing_drops_only_misc() {
        let out = synthetic_listing(PROC).expect("has misc");
        assert!(!out.contains("misc"));
        assert!(out.contains("memory\t5\t90\t1"));
        assert!(out.starts_with("#subsys_name"));
    }

    #[test]
    fn listing_without_misc_is_left_alone() {
        assert!(synthetic_listing("cpuset\t2\t4\t1\n").is_none());
    }

    #[test]
    fn remove_unmounts_and_masks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Sysroot::new(dir.path());
        root.create_dir_all(CGROUP_MISC).expect("misc dir");
        root.write(PROC_CGROUPS, PROC).expect("proc cgroups");
        let mounter = RecordingMounter::default().with_mounts(vec![MountEntry {
            root: "/".into(),
            mount_point: CGROUP_MISC.into(),
            fs_type: "cgroup".into(),
            source: "cgroup".into(),
            super_options: "rw,misc".into(),
        }]);
        let runner = ScriptedRunner::default();
        remove(&Host::new(&root, &mounter, &runner));

        assert!(!root.exists(CGROUP_MISC));
        assert_eq!(
            mounter.calls(),
            vec![
                "umount /sys/fs/cgroup/misc",
                "bind-ro /kind/cgroups /proc/cgroups"
            ]
        );
        assert!(!root.read_to_string(SYNTHETIC_CGROUPS).expect("synthetic").contains("misc"));
    }

    #[test]
    fn remove_is_best_effort() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Sysroot::new(dir.path());
        root.write(PROC_CGROUPS, PROC).expect("proc cgroups");
        let mounter = RecordingMounter::default().failing("bind-ro", libc::EPERM);
        let runner = ScriptedRunner::default();
        remove(&Host::new(&root, &mounter, &runner));
        assert!(mounter.calls().is_empty());
    }
}
