//! Machine and product identity.
//!
//! Sibling nodes start from the same image and would otherwise share a
//! machine id, and they see the host's DMI data. Both are replaced.

use std::path::Path;

use nodeboot_common::constants::{
    DMI_PRODUCT_NAME, DMI_PRODUCT_UUID_PATHS, MACHINE_ID, PRODUCT_NAME, PRODUCT_NAME_MARKER,
    PRODUCT_UUID_MARKER,
};
use nodeboot_common::error::Result;

use crate::command::Invocation;
use crate::host::Host;

/// Regenerates the machine id and masks the DMI product name and UUID.
///
/// # Errors
///
/// Returns an error if `systemd-machine-id-setup` fails or a mask cannot
/// be written or mounted.
pub fn reconcile(host: &Host<'_>) -> Result<()> {
    regenerate_machine_id(host)?;
    mask_product_name(host)?;
    mask_product_uuid(host)
}

fn regenerate_machine_id(host: &Host<'_>) -> Result<()> {
    tracing::info!("clearing and regenerating {MACHINE_ID}");
    host.sysroot.remove_file(MACHINE_ID)?;
    let _ = host
        .runner
        .run_checked(&Invocation::new("systemd-machine-id-setup"))?;
    Ok(())
}

fn mask_product_name(host: &Host<'_>) -> Result<()> {
    if !host.sysroot.exists(DMI_PRODUCT_NAME) {
        return Ok(());
    }
    tracing::info!("faking {DMI_PRODUCT_NAME} to be \"{PRODUCT_NAME}\"");
    host.sysroot
        .write(PRODUCT_NAME_MARKER, format!("{PRODUCT_NAME}\n"))?;
    mask(host, PRODUCT_NAME_MARKER, DMI_PRODUCT_NAME)
}

fn mask_product_uuid(host: &Host<'_>) -> Result<()> {
    if !host.sysroot.exists(PRODUCT_UUID_MARKER) {
        let id = uuid::Uuid::new_v4();
        tracing::info!(uuid = %id, "generating product uuid");
        host.sysroot.write(PRODUCT_UUID_MARKER, format!("{id}\n"))?;
    }
    for target in DMI_PRODUCT_UUID_PATHS {
        if host.sysroot.exists(target) {
            tracing::info!("faking {target}");
            mask(host, PRODUCT_UUID_MARKER, target)?;
        }
    }
    Ok(())
}

fn mask(host: &Host<'_>, source: &str, target: &str) -> Result<()> {
    let target = Path::new(target);
    if host.mounter.is_mount_point(target)? {
        tracing::debug!(target = %target.display(), "already masked");
        return Ok(());
    }
    host.mounter.bind_readonly(Path::new(source), target)
}
