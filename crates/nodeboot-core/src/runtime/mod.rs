//! Configuration consumed by the container runtime and the init system.
//!
//! Runs before any mount changes so containerd and systemd read the final
//! files when they start.

pub mod containerd;
pub mod proxy;
