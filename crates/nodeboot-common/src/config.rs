//! Caller-supplied configuration read from the container environment.

use std::collections::HashMap;

use serde::Serialize;

use crate::types::{DnsSearch, Snapshotter};

/// Environment variable carrying the snapshotter override.
pub const SNAPSHOTTER_VAR: &str = "KIND_CONTAINERD_SNAPSHOTTER";
/// Name kind node images read the override from; preferred when set.
pub const EXPERIMENTAL_SNAPSHOTTER_VAR: &str = "KIND_EXPERIMENTAL_CONTAINERD_SNAPSHOTTER";
/// Environment variable carrying the resolver search override.
pub const DNS_SEARCH_VAR: &str = "KIND_DNS_SEARCH";
/// Proxy variables propagated to every systemd service.
pub const PROXY_VARS: [&str; 3] = ["HTTP_PROXY", "HTTPS_PROXY", "NO_PROXY"];

/// Proxy settings; an unset variable is carried as an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProxySettings {
    /// `HTTP_PROXY`.
    pub http_proxy: String,
    /// `HTTPS_PROXY`.
    pub https_proxy: String,
    /// `NO_PROXY`.
    pub no_proxy: String,
}

/// Root configuration for a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeConfig {
    /// Proxy environment for nested tooling.
    pub proxy: ProxySettings,
    /// Operator snapshotter override, taken verbatim.
    pub snapshotter_override: Option<Snapshotter>,
    /// Resolver search-domain handling.
    pub dns_search: DnsSearch,
}

impl NodeConfig {
    /// Builds the configuration from the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Builds the configuration from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| vars.get(key).cloned().unwrap_or_default();

        let snapshotter_override = [EXPERIMENTAL_SNAPSHOTTER_VAR, SNAPSHOTTER_VAR]
            .iter()
            .find_map(|key| vars.get(*key).filter(|v| !v.is_empty()))
            .map(|v| match v.parse::<Snapshotter>() {
                Ok(s) => s,
                Err(never) => match never {},
            });

        Self {
            proxy: ProxySettings {
                http_proxy: get(PROXY_VARS[0]),
                https_proxy: get(PROXY_VARS[1]),
                no_proxy: get(PROXY_VARS[2]),
            },
            snapshotter_override,
            dns_search: DnsSearch::from_var(vars.get(DNS_SEARCH_VAR).map(String::as_str)),
        }
    }
}
