//! `/dev/kmsg` availability for kubelet's OOM watcher.

use std::path::Path;

use nodeboot_common::constants::{DEV_CONSOLE, DEV_KMSG, DEV_NULL, DMESG_RESTRICT};
use nodeboot_common::error::Result;
use nodeboot_common::types::EnvironmentFacts;

use crate::host::Host;

/// Makes `/dev/kmsg` exist and be readable.
///
/// A missing device is replaced by a symlink to `/dev/console`. Under a
/// user namespace with `kernel.dmesg_restrict=1` it is shadowed by
/// `/dev/null`.
///
/// # Errors
///
/// Returns an error if the symlink or bind mount cannot be created.
pub fn reconcile(host: &Host<'_>, facts: &EnvironmentFacts) -> Result<()> {
    let sysroot = host.sysroot;
    if sysroot.resolve(DEV_KMSG).symlink_metadata().is_err() {
        if sysroot.exists(DEV_CONSOLE) {
            tracing::warn!("/dev/kmsg does not exist, symlinking /dev/console");
            return sysroot.symlink(DEV_CONSOLE, DEV_KMSG);
        }
        tracing::warn!("/dev/kmsg does not exist, nor does /dev/console");
        return Ok(());
    }

    if facts.userns
        && sysroot
            .read_optional(DMESG_RESTRICT)?
            .is_some_and(|v| v.trim() == "1")
        && !host.mounter.is_mount_point(Path::new(DEV_KMSG))?
    {
        tracing::warn!(
            "UserNS: /dev/kmsg is not readable, faking with /dev/null (hint: set sysctl kernel.dmesg_restrict=0)"
        );
        host.mounter.bind(Path::new(DEV_NULL), Path::new(DEV_KMSG))?;
    }
    Ok(())
}
