//! Cgroup reconciliation.
//!
//! kubelet is pointed at a private cgroup root (`/kubelet`) so that nested
//! kubelets on a shared kernel never manage cgroups they do not own. How
//! that root is prepared depends on the [`CgroupMode`]:
//!
//! * **v2**: nothing to do here. systemd evacuates the root cgroup after it
//!   takes over, and only then can `/kubelet` be created with controllers.
//! * **v1 with cgroupns**: drop the `misc` controller and self-bind the
//!   kubelet roots in every hierarchy.
//! * **v1 without cgroupns**: additionally rebuild the container engine's
//!   bind layout so `/proc/<pid>/cgroup` agrees with the filesystem.

pub mod misc;
pub mod subsystem;
pub mod v1;

use std::path::Path;
use std::time::Duration;

use nodeboot_common::error::{NodebootError, Result};
use nodeboot_common::types::CgroupMode;

use crate::host::Host;

/// Prepares the kubelet cgroup root for the given layout.
///
/// # Errors
///
/// Returns an error if a required mount or directory operation fails.
pub fn reconcile(host: &Host<'_>, mode: &CgroupMode) -> Result<()> {
    match mode {
        CgroupMode::V2 => {
            tracing::info!("detected cgroup v2, /kubelet is created once systemd owns the root");
            Ok(())
        }
        CgroupMode::V1Namespaced => {
            tracing::info!("detected cgroup v1 with cgroupns");
            v1::reconcile_namespaced(host)
        }
        CgroupMode::V1Legacy { current } => {
            tracing::info!(current = %current, "detected cgroup v1 without cgroupns");
            v1::reconcile_legacy(host, current)
        }
    }
}

/// Runs [`reconcile`] up to `attempts` times, pausing `delay` between tries.
///
/// # Errors
///
/// Returns [`NodebootError::RetriesExhausted`] wrapping the last failure.
pub fn reconcile_with_retry(
    host: &Host<'_>,
    mode: &CgroupMode,
    attempts: u32,
    delay: Duration,
) -> Result<()> {
    let mut last = None;
    for attempt in 0..attempts {
        match reconcile(host, mode) {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "cgroup fixup failed, retrying");
                log_mounts(host);
                last = Some(e);
                if attempt + 1 < attempts {
                    std::thread::sleep(delay);
                }
            }
        }
    }
    Err(NodebootError::RetriesExhausted {
        operation: "cgroup fixup",
        attempts,
        source: Box::new(last.unwrap_or_else(|| NodebootError::Config {
            message: "no attempts were made".into(),
        })),
    })
}

fn log_mounts(host: &Host<'_>) {
    match host.mounter.mount_table() {
        Ok(table) => {
            for entry in table
                .iter()
                .filter(|e| e.mount_point.starts_with(Path::new("/sys/fs/cgroup")))
            {
                tracing::debug!(
                    mount_point = %entry.mount_point.display(),
                    root = %entry.root,
                    fs_type = %entry.fs_type,
                    "cgroup mount"
                );
            }
        }
        Err(e) => tracing::debug!(error = %e, "mount table unavailable"),
    }
}
