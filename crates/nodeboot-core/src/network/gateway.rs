//! Address of the container engine's host as seen from the node.

use std::net::Ipv4Addr;

use nodeboot_common::constants::{HOST_GATEWAY_NAMES, PROBE_TIMEOUT};

use crate::command::Invocation;
use crate::host::Host;

/// First address in `getent ahosts*` output.
#[must_use]
pub fn first_getent_address(output: &str) -> Option<&str> {
    output.lines().next()?.split_whitespace().next()
}

/// Gateway of `ip -4 route show default` output (`default via <gw> dev ...`).
#[must_use]
pub fn default_gateway(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some("default"), Some("via"), Some(gw)) => gw.parse().ok(),
            _ => None,
        }
    })
}

fn lookup(host: &Host<'_>, name: &str) -> Option<Ipv4Addr> {
    let getent = Invocation::new("getent")
        .args(["ahostsv4", name])
        .timeout(PROBE_TIMEOUT);
    match host.runner.run_checked(&getent) {
        Ok(out) => first_getent_address(&out).and_then(|a| a.parse().ok()),
        Err(e) => {
            tracing::debug!(name, error = %e, "host name did not resolve");
            None
        }
    }
}

/// Resolves the engine host: the well-known host names first, then the
/// default route when they are missing or point at loopback.
pub fn detect(host: &Host<'_>) -> Option<Ipv4Addr> {
    let named = HOST_GATEWAY_NAMES
        .iter()
        .find_map(|name| lookup(host, name).filter(|ip| !ip.is_loopback()));
    if named.is_some() {
        return named;
    }
    let route = Invocation::new("ip").args(["-4", "route", "show", "default"]);
    match host.runner.run_checked(&route) {
        Ok(out) => default_gateway(&out),
        Err(e) => {
            tracing::warn!(error = %e, "cannot read default route");
            None
        }
    }
}
