//! Replacing this process with the init system.

use std::os::unix::process::CommandExt;
use std::process::Command;

use nodeboot_common::error::NodebootError;

/// Execs `argv`. Only returns on failure.
pub fn exec(argv: &[String]) -> NodebootError {
    let Some((program, args)) = argv.split_first() else {
        return NodebootError::Config {
            message: "no init command given".into(),
        };
    };
    tracing::info!(command = %argv.join(" "), "handing off to init");
    let err = Command::new(program).args(args).exec();
    NodebootError::Command {
        program: program.clone(),
        message: format!("exec failed: {err}"),
    }
}
