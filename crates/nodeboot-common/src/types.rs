//! Domain primitive types used across the nodeboot workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which cgroup layout the node runs under, resolved once by the probe.
///
/// Cgroup v2 is always reported as a single state: the container engines
/// enable a cgroup namespace by default there, and nothing downstream
/// branches on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CgroupMode {
    /// Unified hierarchy.
    V2,
    /// Cgroup v1 with a private cgroup namespace (own cgroup reads as `/`).
    V1Namespaced,
    /// Cgroup v1 without a cgroup namespace.
    V1Legacy {
        /// Cgroup path of the `cpu` controller, e.g. `/docker/<id>`.
        current: String,
    },
}

impl fmt::Display for CgroupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V2 => write!(f, "v2"),
            Self::V1Namespaced => write!(f, "v1 (cgroupns)"),
            Self::V1Legacy { current } => write!(f, "v1 (no cgroupns, {current})"),
        }
    }
}

/// Filesystem type as reported by `statfs(2)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsType {
    /// ZFS dataset.
    Zfs,
    /// FUSE-backed filesystem (`stat -f` reports these as `fuseblk`).
    Fuseblk,
    /// `OverlayFS`.
    Overlay,
    /// AUFS, used by old Docker storage drivers.
    Aufs,
    /// Btrfs.
    Btrfs,
    /// ext2/3/4.
    Ext4,
    /// XFS.
    Xfs,
    /// tmpfs.
    Tmpfs,
    /// Anything not listed, keyed by its magic number.
    Other(i64),
    /// statfs failed.
    Unknown,
}

impl FsType {
    /// Maps a `statfs` `f_type` magic number to a filesystem type.
    #[must_use]
    pub const fn from_magic(magic: i64) -> Self {
        match magic {
            0x2fc1_2fc1 => Self::Zfs,
            0x6573_5546 => Self::Fuseblk,
            0x794c_7630 => Self::Overlay,
            0x6175_6673 => Self::Aufs,
            0x9123_683e => Self::Btrfs,
            0xef53 => Self::Ext4,
            0x5846_5342 => Self::Xfs,
            0x0102_1994 => Self::Tmpfs,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zfs => write!(f, "zfs"),
            Self::Fuseblk => write!(f, "fuseblk"),
            Self::Overlay => write!(f, "overlayfs"),
            Self::Aufs => write!(f, "aufs"),
            Self::Btrfs => write!(f, "btrfs"),
            Self::Ext4 => write!(f, "ext2/ext3"),
            Self::Xfs => write!(f, "xfs"),
            Self::Tmpfs => write!(f, "tmpfs"),
            Self::Other(magic) => write!(f, "UNKNOWN ({magic:#x})"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// containerd snapshotter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Snapshotter {
    /// The shipped default.
    Overlayfs,
    /// Plain copy snapshotter.
    Native,
    /// Userspace overlay via FUSE.
    FuseOverlayfs,
    /// containerd's embedded ZFS snapshotter.
    Zfs,
    /// Operator-supplied name passed through verbatim.
    Custom(String),
}

impl Snapshotter {
    /// Returns the name containerd expects in its configuration.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Overlayfs => "overlayfs",
            Self::Native => "native",
            Self::FuseOverlayfs => "fuse-overlayfs",
            Self::Zfs => "zfs",
            Self::Custom(name) => name,
        }
    }
}

impl FromStr for Snapshotter {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "overlayfs" => Self::Overlayfs,
            "native" => Self::Native,
            "fuse-overlayfs" => Self::FuseOverlayfs,
            "zfs" => Self::Zfs,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for Snapshotter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// iptables backend selected through `update-alternatives`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IptablesMode {
    /// xtables kernel interface.
    Legacy,
    /// nftables compatibility layer.
    Nft,
}

impl IptablesMode {
    /// Suffix of the `iptables-<mode>` binaries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Nft => "nft",
        }
    }
}

impl fmt::Display for IptablesMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolver search-domain override.
///
/// The distinction between an unset and an empty variable is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsSearch {
    /// Keep whatever search lines the container engine wrote.
    #[default]
    Unset,
    /// Remove all search lines.
    Empty,
    /// Replace all search lines with a single `search <domains>`.
    Domains(String),
}

impl DnsSearch {
    /// Builds the override from the raw value of the environment variable.
    #[must_use]
    pub fn from_var(value: Option<&str>) -> Self {
        match value {
            None => Self::Unset,
            Some("") => Self::Empty,
            Some(domains) => Self::Domains(domains.to_string()),
        }
    }
}

/// Facts about the host and container gathered before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentFacts {
    /// Running inside a non-initial user namespace.
    pub userns: bool,
    /// Cgroup layout.
    pub cgroup: CgroupMode,
    /// Filesystem backing the container's own state directory.
    pub root_fs: FsType,
    /// The process carries an SELinux type label (`..._t:` in its context).
    pub selinux_enforcing: bool,
    /// Controllers listed in the root `cgroup.controllers` (v2 only).
    pub delegated_controllers: Vec<String>,
    /// `RLIMIT_NOFILE` hard limit, `None` when unlimited or unknown.
    pub nofile_hard_limit: Option<u64>,
    /// Kernel hostname of the node container.
    pub hostname: String,
}

impl Default for EnvironmentFacts {
    fn default() -> Self {
        Self {
            userns: false,
            cgroup: CgroupMode::V1Legacy {
                current: String::new(),
            },
            root_fs: FsType::Unknown,
            selinux_enforcing: false,
            delegated_controllers: Vec::new(),
            nofile_hard_limit: None,
            hostname: String::new(),
        }
    }
}
