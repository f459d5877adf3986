//! Node address churn across restarts.
//!
//! A restarted node container may come back with a new address. The
//! previous one is kept in a marker file and every tracked control-plane
//! file is rewritten when it differs.

use std::borrow::Cow;

use nodeboot_common::constants::{
    ADDRESS_TRACKED_FILES, OLD_IPV4_MARKER, OLD_IPV6_MARKER, PROBE_TIMEOUT,
};
use nodeboot_common::error::{NodebootError, Result};
use regex::Regex;

use super::gateway::first_getent_address;
use crate::command::Invocation;
use crate::host::Host;

/// Address family tracked by a marker file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// IPv4; a lost address is fatal.
    V4,
    /// IPv6; a lost address is only logged.
    V6,
}

impl Family {
    const fn marker(self) -> &'static str {
        match self {
            Self::V4 => OLD_IPV4_MARKER,
            Self::V6 => OLD_IPV6_MARKER,
        }
    }

    const fn database(self) -> &'static str {
        match self {
            Self::V4 => "ahostsv4",
            Self::V6 => "ahostsv6",
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
        }
    }
}

/// Replaces whole-token occurrences of `old` with `new`.
///
/// # Errors
///
/// Returns an error if the pattern cannot be compiled.
pub fn replace_address<'t>(text: &'t str, old: &str, new: &str) -> Result<Cow<'t, str>> {
    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(old))).map_err(|e| {
        NodebootError::Parse {
            what: "address pattern".into(),
            message: e.to_string(),
        }
    })?;
    Ok(pattern.replace_all(text, regex::NoExpand(new)))
}

/// The node's own address of `family`, resolved through its hostname.
pub fn current(host: &Host<'_>, hostname: &str, family: Family) -> Option<String> {
    let getent = Invocation::new("getent")
        .args([family.database(), hostname])
        .timeout(PROBE_TIMEOUT);
    match host.runner.run_checked(&getent) {
        Ok(out) => first_getent_address(&out).map(str::to_string),
        Err(e) => {
            tracing::debug!(family = family.label(), error = %e, "no address for hostname");
            None
        }
    }
}

/// Compares the current address with the recorded one, rewrites the
/// tracked files on change and records the current address.
///
/// Returns whether the address changed.
///
/// # Errors
///
/// Returns [`NodebootError::Inconsistent`] when an IPv4 address was
/// recorded but none is current, or an I/O error from a tracked file.
pub fn reconcile(host: &Host<'_>, hostname: &str, family: Family) -> Result<bool> {
    let current = current(host, hostname, family);
    tracing::info!(
        "detected {} address: {}",
        family.label(),
        current.as_deref().unwrap_or_default()
    );

    let old = host
        .sysroot
        .read_optional(family.marker())?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let mut changed = false;
    if let Some(old) = old {
        tracing::info!("detected old {} address: {old}", family.label());
        match (&current, family) {
            (None, Family::V4) => {
                return Err(NodebootError::Inconsistent {
                    message: format!(
                        "have an old {} address ({old}) but no current one",
                        family.label()
                    ),
                });
            }
            (None, Family::V6) => {
                tracing::error!("have an old IPv6 address but no current IPv6 address");
            }
            (Some(current), _) if *current != old => {
                changed = true;
                rewrite_tracked_files(host, &old, current)?;
            }
            (Some(_), _) => {}
        }
    }

    if let Some(current) = &current {
        host.sysroot.write(family.marker(), current)?;
    }
    Ok(changed)
}

fn rewrite_tracked_files(host: &Host<'_>, old: &str, new: &str) -> Result<()> {
    for file in ADDRESS_TRACKED_FILES {
        // Manifests only exist on control-plane nodes.
        if !host.sysroot.is_file(file) {
            continue;
        }
        let text = host.sysroot.read_to_string(file)?;
        if let Cow::Owned(updated) = replace_address(&text, old, new)? {
            tracing::info!(path = file, old, new, "updating node address");
            host.sysroot.write(file, updated)?;
        }
    }
    Ok(())
}
