//! # nodeboot-core
//!
//! Reconciles a generic Linux container into something a kubelet, containerd
//! and systemd accept as a node.
//!
//! Every fixup reads and mutates the host through three seams bundled in
//! [`host::Host`]:
//! - [`sysroot::Sysroot`] for files, rooted so tests can use a temp tree.
//! - [`filesystem::mount::Mounter`] for mount syscalls.
//! - [`command::CommandRunner`] for external tools.
//!
//! [`reconcile::Reconciler`] runs the fixups in order. The `testing` module,
//! built for tests and behind the `testing` feature, holds in-memory
//! backends.

pub mod cgroup;
pub mod command;
pub mod filesystem;
pub mod host;
pub mod identity;
pub mod iptables;
pub mod kmsg;
pub mod namespace;
pub mod network;
pub mod probe;
pub mod reconcile;
pub mod runtime;
pub mod sysroot;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod validate;
