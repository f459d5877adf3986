//! Namespace detection.
//!
//! Reads the kernel's per-process views (`uid_map`, `/proc/self/cgroup`)
//! to tell which namespaces the node container was started in.

pub mod cgroup;
pub mod user;
