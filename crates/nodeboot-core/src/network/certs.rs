//! API server serving certificate regeneration.

use nodeboot_common::constants::{APISERVER_CERT, APISERVER_KEY, KUBEADM_CONFIG};
use nodeboot_common::error::Result;

use crate::command::Invocation;
use crate::host::Host;

/// Deletes and regenerates the API server certificate so its SANs match
/// the new node address. Nodes without one are left alone.
///
/// # Errors
///
/// Returns an error if the old pair cannot be removed or kubeadm fails.
pub fn regenerate(host: &Host<'_>) -> Result<()> {
    if !host.sysroot.is_file(APISERVER_CERT) || !host.sysroot.is_file(APISERVER_KEY) {
        tracing::debug!("no API server certificate, skipping regeneration");
        return Ok(());
    }
    tracing::info!("clearing and regenerating the certificate for serving the Kubernetes API");
    host.sysroot.remove_file(APISERVER_CERT)?;
    host.sysroot.remove_file(APISERVER_KEY)?;
    let kubeadm = Invocation::new("kubeadm").args([
        "init",
        "phase",
        "certs",
        "apiserver",
        "--config",
        KUBEADM_CONFIG,
    ]);
    let _ = host.runner.run_checked(&kubeadm)?;
    Ok(())
}
