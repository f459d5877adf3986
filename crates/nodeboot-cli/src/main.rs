//! # nodeboot
//!
//! Entrypoint for Kubernetes node containers. Reconciles the container
//! environment, then replaces itself with the init system.

mod cli;
mod handoff;
mod output;

use std::process::ExitCode;

use clap::Parser;
use nodeboot_common::constants::CGROUP_FIX_EXIT_CODE;
use nodeboot_common::error::NodebootError;

use crate::cli::{Cli, LogFormat};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli::execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "node bootstrap failed");
            ExitCode::from(exit_status(&e))
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Exhausted cgroup retries get their own status so orchestrators can tell
/// them apart from other failures.
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<NodebootError>() {
        Some(NodebootError::RetriesExhausted { .. }) => {
            u8::try_from(CGROUP_FIX_EXIT_CODE).unwrap_or(1)
        }
        _ => 1,
    }
}
