//! Mount fixups required before the init system starts.
//!
//! * `mount`/`umount` must be root-owned and not setuid, or they misbehave
//!   after a userns-remap step changed their ownership.
//! * systemd expects a read-only `/sys` inside a container.
//! * `/` must be shared so later bind mounts reach the init system.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nodeboot_common::error::Result;
use nodeboot_common::types::{EnvironmentFacts, FsType};

use super::mount::Propagation;
use crate::host::Host;

const SETUID_SETGID: u32 = 0o6000;

/// Runs all mount fixups.
///
/// # Errors
///
/// Returns an error if `/sys` cannot be remounted outside a user namespace,
/// or if `/` cannot be made shared.
pub fn reconcile(host: &Host<'_>, facts: &EnvironmentFacts) -> Result<()> {
    tracing::info!("ensuring we can execute mount/umount even with userns-remap");
    let binaries = mount_binaries(host);
    for binary in &binaries {
        reset_ownership(host, binary);
    }

    // Avoids "text file busy" on the next mount call on AUFS.
    if binaries
        .first()
        .is_some_and(|bin| host.mounter.fs_type(bin) == FsType::Aufs)
    {
        tracing::info!("detected aufs, calling sync");
        host.mounter.sync();
    }

    remount_sys_readonly(host, facts)?;

    tracing::info!("making mounts shared");
    host.mounter
        .set_propagation(Path::new("/"), Propagation::Shared)
}

fn mount_binaries(host: &Host<'_>) -> Vec<PathBuf> {
    ["mount", "umount"]
        .into_iter()
        .filter_map(|name| {
            let found = host.sysroot.find_binary(name);
            if found.is_none() {
                tracing::warn!(binary = name, "binary not found on PATH");
            }
            found
        })
        .collect()
}

/// chown root:root and chmod -s. Failures are logged; the binary stays usable
/// for root in most layouts.
fn reset_ownership(host: &Host<'_>, binary: &Path) {
    let full = host.sysroot.resolve(binary);
    let meta = match std::fs::metadata(&full) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::warn!(path = %binary.display(), error = %e, "cannot stat binary");
            return;
        }
    };

    if meta.uid() != 0 || meta.gid() != 0 {
        let root = (Some(nix::unistd::Uid::from_raw(0)), Some(nix::unistd::Gid::from_raw(0)));
        if let Err(e) = nix::unistd::chown(&full, root.0, root.1) {
            tracing::warn!(path = %binary.display(), error = %e, "failed to chown to root");
        }
    }

    let mode = meta.permissions().mode();
    if mode & SETUID_SETGID != 0 {
        let cleared = std::fs::Permissions::from_mode(mode & !SETUID_SETGID);
        if let Err(e) = std::fs::set_permissions(&full, cleared) {
            tracing::warn!(path = %binary.display(), error = %e, "failed to clear setuid bit");
        }
    }
}

fn remount_sys_readonly(host: &Host<'_>, facts: &EnvironmentFacts) -> Result<()> {
    tracing::info!("remounting /sys read-only");
    match host.mounter.remount_readonly(Path::new("/sys")) {
        Ok(()) => Ok(()),
        Err(e)
            if facts.userns
                && e.mount_errno()
                    .is_some_and(|n| n == libc::EACCES || n == libc::EPERM) =>
        {
            tracing::warn!(error = %e, "UserNS: cannot remount /sys read-only, continuing");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
