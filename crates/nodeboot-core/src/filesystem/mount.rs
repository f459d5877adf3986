//! Mount-table operations behind a fakeable seam.
//!
//! All paths handed to a [`Mounter`] are absolute in-container paths; the
//! Linux implementation resolves them through its [`Sysroot`].

use std::path::Path;

use nodeboot_common::error::Result;
use nodeboot_common::types::FsType;

use super::mountinfo::MountEntry;
use super::overlayfs::OverlayConfig;
use crate::sysroot::Sysroot;

/// Recursive mount propagation applied with `--make-r*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Events propagate to and from peers.
    Shared,
    /// No propagation.
    Private,
}

/// Kernel mount operations the reconcilers need.
pub trait Mounter {
    /// Bind-mounts `source` onto `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `mount(2)` syscall fails.
    fn bind(&self, source: &Path, target: &Path) -> Result<()>;

    /// Bind-mounts `source` onto `target` and makes the new mount read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if either `mount(2)` call fails.
    fn bind_readonly(&self, source: &Path, target: &Path) -> Result<()>;

    /// Remounts an existing mount read-only, keeping its other flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the remount is refused.
    fn remount_readonly(&self, target: &Path) -> Result<()>;

    /// Changes the propagation type of `target` and every mount below it.
    ///
    /// # Errors
    ///
    /// Returns an error if the `mount(2)` syscall fails.
    fn set_propagation(&self, target: &Path, propagation: Propagation) -> Result<()>;

    /// Mounts an `OverlayFS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `mount(2)` syscall fails.
    fn mount_overlay(&self, config: &OverlayConfig) -> Result<()>;

    /// Unmounts `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `umount(2)` syscall fails.
    fn unmount(&self, target: &Path) -> Result<()>;

    /// Returns the current mount table.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    fn mount_table(&self) -> Result<Vec<MountEntry>>;

    /// Reports the filesystem holding `path`; never fails.
    fn fs_type(&self, path: &Path) -> FsType;

    /// Flushes filesystem buffers.
    fn sync(&self);

    /// Whether something is mounted exactly at `target`.
    ///
    /// Implementations on a real filesystem compare the symlink-resolved
    /// target, since that is the path the kernel records.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    fn is_mount_point(&self, target: &Path) -> Result<bool> {
        Ok(self
            .mount_table()?
            .iter()
            .any(|entry| entry.mount_point == target))
    }
}

/// [`Mounter`] issuing real syscalls.
#[derive(Debug, Clone, Default)]
pub struct LinuxMounter {
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    sysroot: Sysroot,
}

impl LinuxMounter {
    /// Creates a mounter resolving paths through `sysroot`.
    #[must_use]
    pub const fn new(sysroot: Sysroot) -> Self {
        Self { sysroot }
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::path::Path;

    use nix::mount::{MntFlags, MsFlags, mount, umount2};
    use nix::sys::statvfs::{FsFlags, statvfs};
    use nodeboot_common::constants::PROC_SELF_MOUNTINFO;
    use nodeboot_common::error::{NodebootError, Result};
    use nodeboot_common::types::FsType;

    use super::{LinuxMounter, Mounter, Propagation};
    use crate::filesystem::mountinfo::{self, MountEntry};
    use crate::filesystem::overlayfs::{self, OverlayConfig};

    const NONE: Option<&str> = None;

    fn failed(operation: &'static str, target: &Path) -> impl FnOnce(nix::Error) -> NodebootError {
        let target = target.to_path_buf();
        move |errno| NodebootError::Mount {
            operation,
            target,
            source: std::io::Error::from(errno),
        }
    }

    /// Flags of an existing mount that must be repeated on remount, or the
    /// kernel refuses to drop them inside a user namespace.
    fn locked_flags(path: &Path) -> MsFlags {
        let Ok(stat) = statvfs(path) else {
            return MsFlags::empty();
        };
        let mut flags = MsFlags::empty();
        for (fs, ms) in [
            (FsFlags::ST_NOSUID, MsFlags::MS_NOSUID),
            (FsFlags::ST_NODEV, MsFlags::MS_NODEV),
            (FsFlags::ST_NOEXEC, MsFlags::MS_NOEXEC),
        ] {
            if stat.flags().contains(fs) {
                flags |= ms;
            }
        }
        flags
    }

    impl Mounter for LinuxMounter {
        fn bind(&self, source: &Path, target: &Path) -> Result<()> {
            let src = self.sysroot.resolve(source);
            let dst = self.sysroot.resolve(target);
            mount(Some(&src), &dst, NONE, MsFlags::MS_BIND, NONE)
                .map_err(failed("bind mount", target))?;
            tracing::debug!(source = %source.display(), target = %target.display(), "bind mounted");
            Ok(())
        }

        fn bind_readonly(&self, source: &Path, target: &Path) -> Result<()> {
            self.bind(source, target)?;
            let dst = self.sysroot.resolve(target);
            let flags =
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | locked_flags(&dst);
            mount(NONE, &dst, NONE, flags, NONE).map_err(failed("read-only remount", target))
        }

        fn remount_readonly(&self, target: &Path) -> Result<()> {
            let dst = self.sysroot.resolve(target);
            let flags = MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | locked_flags(&dst);
            mount(NONE, &dst, NONE, flags, NONE).map_err(failed("read-only remount", target))
        }

        fn set_propagation(&self, target: &Path, propagation: Propagation) -> Result<()> {
            let dst = self.sysroot.resolve(target);
            let kind = match propagation {
                Propagation::Shared => MsFlags::MS_SHARED,
                Propagation::Private => MsFlags::MS_PRIVATE,
            };
            mount(NONE, &dst, NONE, kind | MsFlags::MS_REC, NONE)
                .map_err(failed("propagation change", target))
        }

        fn mount_overlay(&self, config: &OverlayConfig) -> Result<()> {
            overlayfs::mount_overlay(&self.sysroot, config)
        }

        fn unmount(&self, target: &Path) -> Result<()> {
            let dst = self.sysroot.resolve(target);
            umount2(&dst, MntFlags::empty()).map_err(failed("unmount", target))
        }

        fn mount_table(&self) -> Result<Vec<MountEntry>> {
            let text = std::fs::read_to_string(PROC_SELF_MOUNTINFO)
                .map_err(|e| NodebootError::io(PROC_SELF_MOUNTINFO, e))?;
            Ok(mountinfo::parse(&text))
        }

        fn is_mount_point(&self, target: &Path) -> Result<bool> {
            let target = self.sysroot.canonicalize(target);
            Ok(self
                .mount_table()?
                .iter()
                .any(|entry| entry.mount_point == target))
        }

        #[allow(clippy::cast_possible_wrap, clippy::useless_conversion)]
        fn fs_type(&self, path: &Path) -> FsType {
            nix::sys::statfs::statfs(&self.sysroot.resolve(path)).map_or(FsType::Unknown, |s| {
                FsType::from_magic(s.filesystem_type().0 as i64)
            })
        }

        fn sync(&self) {
            nix::unistd::sync();
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod stub {
    use std::path::Path;

    use nodeboot_common::error::{NodebootError, Result};
    use nodeboot_common::types::FsType;

    use super::{LinuxMounter, Mounter, Propagation};
    use crate::filesystem::mountinfo::MountEntry;
    use crate::filesystem::overlayfs::OverlayConfig;

    fn unsupported<T>() -> Result<T> {
        Err(NodebootError::Config {
            message: "Linux required for mount operations".into(),
        })
    }

    impl Mounter for LinuxMounter {
        fn bind(&self, _source: &Path, _target: &Path) -> Result<()> {
            unsupported()
        }

        fn bind_readonly(&self, _source: &Path, _target: &Path) -> Result<()> {
            unsupported()
        }

        fn remount_readonly(&self, _target: &Path) -> Result<()> {
            unsupported()
        }

        fn set_propagation(&self, _target: &Path, _propagation: Propagation) -> Result<()> {
            unsupported()
        }

        fn mount_overlay(&self, _config: &OverlayConfig) -> Result<()> {
            unsupported()
        }

        fn unmount(&self, _target: &Path) -> Result<()> {
            unsupported()
        }

        fn mount_table(&self) -> Result<Vec<MountEntry>> {
            unsupported()
        }

        fn fs_type(&self, _path: &Path) -> FsType {
            FsType::Unknown
        }

        fn sync(&self) {}
    }
}
