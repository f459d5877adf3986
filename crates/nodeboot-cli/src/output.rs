//! Report rendering for `--no-exec` runs.

use std::io::Write;

use nodeboot_core::reconcile::Report;

use crate::cli::LogFormat;

/// Renders the report as aligned `key: value` lines.
#[must_use]
pub fn format_report(report: &Report) -> String {
    let facts = &report.facts;
    let rows = [
        ("user namespace", facts.userns.to_string()),
        ("cgroup", facts.cgroup.to_string()),
        ("root filesystem", facts.root_fs.to_string()),
        ("selinux enforcing", facts.selinux_enforcing.to_string()),
        (
            "snapshotter",
            report
                .snapshotter
                .as_ref()
                .map_or_else(|| "default".to_string(), ToString::to_string),
        ),
        ("iptables", report.iptables.to_string()),
    ];
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or_default();
    rows.iter()
        .map(|(key, value)| format!("{key:<width$}  {value}\n"))
        .collect()
}

/// Prints the report to stdout in the requested format.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn print_report(report: &Report, format: LogFormat) -> anyhow::Result<()> {
    let rendered = match format {
        LogFormat::Text => format_report(report),
        LogFormat::Json => format!("{}\n", serde_json::to_string_pretty(report)?),
    };
    std::io::stdout().lock().write_all(rendered.as_bytes())?;
    Ok(())
}
