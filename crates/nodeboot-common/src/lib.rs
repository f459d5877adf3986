//! # nodeboot-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the entire nodeboot workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the environment facts and well-known paths
//! every reconciler agrees on.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
