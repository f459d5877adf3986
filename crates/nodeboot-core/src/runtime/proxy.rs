//! Proxy propagation into systemd's default service environment.

use nodeboot_common::config::ProxySettings;
use nodeboot_common::constants::PROXY_DROPIN;
use nodeboot_common::error::Result;

use crate::sysroot::Sysroot;

/// Renders the `[Manager]` drop-in carrying the proxy variables.
#[must_use]
pub fn render(proxy: &ProxySettings) -> String {
    format!(
        "[Manager]\nDefaultEnvironment=\"HTTP_PROXY={}\" \"HTTPS_PROXY={}\" \"NO_PROXY={}\"\n",
        proxy.http_proxy, proxy.https_proxy, proxy.no_proxy
    )
}

/// Writes the drop-in so every service systemd starts sees the proxy.
///
/// # Errors
///
/// Returns an error if the drop-in cannot be written.
pub fn configure(sysroot: &Sysroot, proxy: &ProxySettings) -> Result<()> {
    sysroot.write(PROXY_DROPIN, render(proxy))?;
    tracing::debug!(path = PROXY_DROPIN, "wrote proxy default environment");
    Ok(())
}
