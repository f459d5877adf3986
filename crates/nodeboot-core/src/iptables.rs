//! iptables backend selection.
//!
//! The node image ships both the legacy and the nft backends. Whichever one
//! the host has already written rules with is the one kube-proxy and the
//! CNI must use, so the backend with more rules wins.

use nodeboot_common::constants::PROBE_TIMEOUT;
use nodeboot_common::types::IptablesMode;

use crate::command::Invocation;
use crate::host::Host;

/// Picks the backend with more rules; ties go to legacy.
#[must_use]
pub const fn select_mode(legacy_rules: usize, nft_rules: usize) -> IptablesMode {
    if legacy_rules >= nft_rules {
        IptablesMode::Legacy
    } else {
        IptablesMode::Nft
    }
}

/// Counts rule lines (`-A ...`, `-N ...`) in `*-save` output.
#[must_use]
pub fn count_rules(save_output: &str) -> usize {
    save_output.lines().filter(|l| l.starts_with('-')).count()
}

fn rules_for(host: &Host<'_>, mode: IptablesMode) -> usize {
    ["iptables", "ip6tables"]
        .iter()
        .map(|family| {
            let save = Invocation::new(format!("{family}-{mode}-save")).timeout(PROBE_TIMEOUT);
            match host.runner.run(&save) {
                Ok(output) => count_rules(&output.stdout),
                Err(e) => {
                    tracing::debug!(command = %save.command_line(), error = %e, "rule dump unavailable");
                    0
                }
            }
        })
        .sum()
}

/// Detects the active backend and points the `iptables` and `ip6tables`
/// alternatives at it.
///
/// Failing to switch an alternative is logged and otherwise ignored.
pub fn reconcile(host: &Host<'_>) -> IptablesMode {
    let legacy = rules_for(host, IptablesMode::Legacy);
    let nft = rules_for(host, IptablesMode::Nft);
    let mode = select_mode(legacy, nft);
    tracing::info!(legacy, nft, mode = %mode, "setting iptables to detected mode");

    for family in ["iptables", "ip6tables"] {
        let set = Invocation::new("update-alternatives").args([
            "--set".to_string(),
            family.to_string(),
            format!("/usr/sbin/{family}-{mode}"),
        ]);
        if let Err(e) = host.runner.run_checked(&set) {
            tracing::warn!(family, error = %e, "failed to switch iptables alternative");
        }
    }
    mode
}
