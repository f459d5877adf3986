//! Filesystem and mount-table management.
//!
//! Provides the [`mount::Mounter`] seam over `mount(2)`, a parser for
//! `/proc/self/mountinfo`, the throwaway `OverlayFS` probe, and the mount
//! fixups run before the init system takes over.

pub mod fixup;
pub mod mount;
pub mod mountinfo;
pub mod overlayfs;
