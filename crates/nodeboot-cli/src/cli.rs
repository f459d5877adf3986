//! Command-line surface and top-level flow.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use nodeboot_common::config::NodeConfig;
use nodeboot_core::command::SystemRunner;
use nodeboot_core::filesystem::mount::LinuxMounter;
use nodeboot_core::host::Host;
use nodeboot_core::reconcile::Reconciler;
use nodeboot_core::sysroot::Sysroot;

use crate::{handoff, output};

/// Log line format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Reconciles a node container, then execs its init system.
#[derive(Parser, Debug)]
#[command(name = "nodeboot", version, about, long_about = None)]
pub struct Cli {
    /// Root every well-known path is resolved against.
    #[arg(long, env = "NODEBOOT_SYSROOT", default_value = "/", hide = true)]
    pub sysroot: PathBuf,

    /// Log format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Reconcile and print the report instead of exec'ing the init command.
    #[arg(long)]
    pub no_exec: bool,

    /// Init command and arguments, e.g. `/sbin/init`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Runs the reconciliation and hands off to the init command.
///
/// # Errors
///
/// Returns an error if a fatal reconciliation step fails or the init
/// command cannot be executed.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let sysroot = Sysroot::new(&cli.sysroot);
    let mounter = LinuxMounter::new(sysroot.clone());
    let runner = SystemRunner;
    let config = NodeConfig::from_env();
    tracing::debug!(config = %serde_json::to_string(&config)?, "loaded configuration");

    let report = Reconciler::new(Host::new(&sysroot, &mounter, &runner), &config).run()?;
    tracing::debug!(report = %serde_json::to_string(&report)?, "reconciliation finished");

    if cli.no_exec {
        return output::print_report(&report, cli.log_format);
    }
    Err(handoff::exec(&cli.command).into())
}
