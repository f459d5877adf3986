//! Network reconciliation: embedded DNS redirect and node address churn.

pub mod address;
pub mod certs;
pub mod gateway;
pub mod resolv;
pub mod rules;

use nodeboot_common::config::NodeConfig;
use nodeboot_common::error::{NodebootError, Result};
use nodeboot_common::types::EnvironmentFacts;

use crate::host::Host;

use self::address::Family;

/// Redirects DNS through the engine host, then follows address changes.
///
/// DNS redirect failures are logged and do not stop the address check.
///
/// # Errors
///
/// Returns an error if the recorded IPv4 address is gone or the address
/// change cannot be applied.
pub fn reconcile(host: &Host<'_>, config: &NodeConfig, facts: &EnvironmentFacts) -> Result<()> {
    if let Err(e) = redirect_dns(host, config) {
        tracing::warn!(error = %e, "DNS redirect failed, continuing");
    }

    let v4 = address::reconcile(host, &facts.hostname, Family::V4)?;
    let v6 = address::reconcile(host, &facts.hostname, Family::V6)?;
    if v4 || v6 {
        certs::regenerate(host)?;
    }
    Ok(())
}

fn redirect_dns(host: &Host<'_>, config: &NodeConfig) -> Result<()> {
    let target = gateway::detect(host).ok_or_else(|| NodebootError::Command {
        program: "getent".into(),
        message: "no address for the container engine host".into(),
    })?;
    tracing::info!(host = %target, "detected container engine host");
    if let Err(e) = rules::reconcile(host, target) {
        tracing::warn!(error = %e, "failed to rewrite embedded DNS rules");
    }
    resolv::reconcile(host, target, &config.dns_search)
}
