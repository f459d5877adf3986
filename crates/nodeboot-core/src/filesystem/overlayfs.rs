//! `OverlayFS` mounting and the in-namespace usability probe.
//!
//! containerd's default snapshotter needs overlay mounts. Inside a user
//! namespace those only work on kernels that allow unprivileged overlay, so
//! the runtime configurator asks [`overlay_usable`] before keeping it.

use std::path::{Path, PathBuf};

use nodeboot_common::constants::{OVERLAY_PERMIT_USERNS, STATE_DIR};
use nodeboot_common::error::{NodebootError, Result};

use super::mount::Mounter;
use crate::sysroot::Sysroot;

/// Configuration for an `OverlayFS` mount. Paths are in-container paths.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Read-only lower layers (bottom to top).
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Lays out a single-lower overlay under `base`.
    #[must_use]
    pub fn scratch(base: &Path) -> Self {
        Self {
            lower_dirs: vec![base.join("lower")],
            upper_dir: base.join("upper"),
            work_dir: base.join("work"),
            merged_dir: base.join("merged"),
        }
    }
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// Creates the lower, upper, work, and merged directories if they do not
/// exist, then issues the `mount(2)` syscall with overlay-specific options.
///
/// # Errors
///
/// Returns an error if directory creation fails or if the mount syscall fails.
#[cfg(target_os = "linux")]
pub fn mount_overlay(sysroot: &Sysroot, config: &OverlayConfig) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    for dir in config
        .lower_dirs
        .iter()
        .chain([&config.upper_dir, &config.work_dir, &config.merged_dir])
    {
        sysroot.create_dir_all(dir)?;
    }

    let lowers = config
        .lower_dirs
        .iter()
        .map(|p| sysroot.resolve(p).display().to_string())
        .collect::<Vec<_>>()
        .join(":");
    let opts = format!(
        "lowerdir={},upperdir={},workdir={}",
        lowers,
        sysroot.resolve(&config.upper_dir).display(),
        sysroot.resolve(&config.work_dir).display()
    );

    mount(
        Some("overlay"),
        &sysroot.resolve(&config.merged_dir),
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|e| NodebootError::Mount {
        operation: "overlay mount",
        target: config.merged_dir.clone(),
        source: std::io::Error::from(e),
    })?;

    tracing::debug!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error. `OverlayFS` mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_overlay(_sysroot: &Sysroot, _config: &OverlayConfig) -> Result<()> {
    Err(NodebootError::Config {
        message: "Linux required for overlay mounts".into(),
    })
}

/// Errnos meaning "overlay is not available here" rather than a real fault.
const UNSUPPORTED_ERRNOS: &[i32] = &[libc::EPERM, libc::EACCES, libc::EINVAL, libc::ENODEV];

/// Decides whether overlay mounts work in the current user namespace.
///
/// Kernels carrying Ubuntu's `permit_mounts_in_userns` patch are known to be
/// unstable and are treated as unusable whatever the parameter says. Otherwise
/// a throwaway overlay is mounted under the state directory and unmounted
/// again.
///
/// # Errors
///
/// Returns an error only when the probe mount fails for a reason other than
/// lack of support, or the scratch directories cannot be managed.
pub fn overlay_usable(sysroot: &Sysroot, mounter: &dyn Mounter) -> Result<bool> {
    if sysroot.exists(OVERLAY_PERMIT_USERNS) {
        tracing::info!("overlay permit_mounts_in_userns is present, avoiding in-namespace overlay");
        return Ok(false);
    }

    let base = Path::new(STATE_DIR).join(".overlay-probe");
    let config = OverlayConfig::scratch(&base);
    let usable = match mounter.mount_overlay(&config) {
        Ok(()) => {
            if let Err(e) = mounter.unmount(&config.merged_dir) {
                tracing::warn!(error = %e, "failed to unmount overlay probe");
            }
            true
        }
        Err(e) if e.mount_errno().is_some_and(|n| UNSUPPORTED_ERRNOS.contains(&n)) => {
            tracing::info!(error = %e, "overlay is not supported in this user namespace");
            false
        }
        Err(e) => return Err(e),
    };

    let full = sysroot.resolve(&base);
    if full.exists() {
        std::fs::remove_dir_all(&full).map_err(|e| NodebootError::io(full, e))?;
    }
    Ok(usable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingMounter;

    #[test]
    fn permit_mounts_in_userns_is_avoided() {
        for value in ["Y\n", "N\n"] {
            let dir = tempfile::tempdir().expect("tempdir");
            let root = Sysroot::new(dir.path());
            root.write(OVERLAY_PERMIT_USERNS, value).expect("write");
            let mounter = RecordingMounter::default();
            assert!(!overlay_usable(&root, &mounter).expect("check"), "{value:?}");
            assert!(mounter.calls().is_empty());
        }
    }

    #[test]
    fn successful_probe_is_unmounted_and_cleaned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Sysroot::new(dir.path());
        root.create_dir_all("/kind/.overlay-probe/merged").expect("mkdir");
        let mounter = RecordingMounter::default();
        assert!(overlay_usable(&root, &mounter).expect("probe"));
        assert!(
            mounter
                .calls()
                .iter()
                .any(|c| c == "umount /kind/.overlay-probe/merged")
        );
        assert!(!root.exists("/kind/.overlay-probe"));
    }

    #[test]
    fn eperm_means_unsupported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Sysroot::new(dir.path());
        let mounter = RecordingMounter::default().failing("overlay", libc::EPERM);
        assert!(!overlay_usable(&root, &mounter).expect("probe"));
    }

    #[test]
    fn unexpected_errno_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Sysroot::new(dir.path());
        let mounter = RecordingMounter::default().failing("overlay", libc::EIO);
        assert!(overlay_usable(&root, &mounter).is_err());
    }
}
