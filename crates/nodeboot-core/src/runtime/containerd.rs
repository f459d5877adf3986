//! containerd snapshotter selection and config patching.

use nodeboot_common::config::NodeConfig;
use nodeboot_common::constants::{CONTAINERD_CONFIG, DEFAULT_SNAPSHOTTER, FUSE_OVERLAYFS_UNIT};
use nodeboot_common::error::{NodebootError, Result};
use nodeboot_common::types::{EnvironmentFacts, FsType, Snapshotter};
use toml_edit::{DocumentMut, Formatted, Item, TableLike, Value};

use crate::command::Invocation;
use crate::filesystem::overlayfs;
use crate::host::Host;

/// Picks the snapshotter, or `None` to keep containerd's default.
///
/// Namespaced nodes avoid overlay under an SELinux label; otherwise
/// `overlay_usable` is consulted, and only for namespaced nodes without an
/// earlier match.
///
/// # Errors
///
/// Propagates an unexpected failure of the overlay probe.
pub fn choose_snapshotter(
    override_: Option<&Snapshotter>,
    facts: &EnvironmentFacts,
    overlay_usable: impl FnOnce() -> Result<bool>,
) -> Result<Option<Snapshotter>> {
    if let Some(choice) = override_ {
        return Ok(Some(choice.clone()));
    }
    match facts.root_fs {
        // The embedded zfs snapshotter breaks on host/container zfs skew.
        FsType::Zfs => return Ok(Some(Snapshotter::Native)),
        FsType::Fuseblk => return Ok(Some(Snapshotter::FuseOverlayfs)),
        _ => {}
    }
    if facts.userns {
        if facts.selinux_enforcing {
            tracing::info!("SELinux label under a user namespace, avoiding overlay");
            return Ok(Some(Snapshotter::FuseOverlayfs));
        }
        if !overlay_usable()? {
            return Ok(Some(Snapshotter::FuseOverlayfs));
        }
    }
    Ok(None)
}

/// Rewrites the containerd config.
///
/// Every `snapshotter = "overlayfs"` becomes `snapshotter`, and with
/// `restrict_oom` every `restrict_oom_score_adj = false` becomes `true`.
/// Comments and layout of the rest of the file are kept. Returns `None`
/// when nothing changed.
///
/// # Errors
///
/// Returns an error if the text is not valid TOML.
pub fn patch_config(
    text: &str,
    snapshotter: Option<&Snapshotter>,
    restrict_oom: bool,
) -> Result<Option<String>> {
    let mut doc: DocumentMut = text.parse().map_err(|e: toml_edit::TomlError| {
        NodebootError::Parse {
            what: CONTAINERD_CONFIG.into(),
            message: e.to_string(),
        }
    })?;
    let changed = patch_table(doc.as_table_mut(), snapshotter, restrict_oom);
    Ok(changed.then(|| doc.to_string()))
}

fn patch_table(
    table: &mut dyn TableLike,
    snapshotter: Option<&Snapshotter>,
    restrict_oom: bool,
) -> bool {
    let mut changed = false;
    for (key, item) in table.iter_mut() {
        match (key.get(), item) {
            ("snapshotter", Item::Value(Value::String(current))) => {
                let target = snapshotter.map(Snapshotter::as_str);
                if let Some(target) = target.filter(|t| *t != DEFAULT_SNAPSHOTTER) {
                    if current.value() == DEFAULT_SNAPSHOTTER {
                        let decor = current.decor().clone();
                        *current = Formatted::new(target.to_string());
                        *current.decor_mut() = decor;
                        changed = true;
                    }
                }
            }
            ("restrict_oom_score_adj", Item::Value(Value::Boolean(current))) => {
                if restrict_oom && !*current.value() {
                    let decor = current.decor().clone();
                    *current = Formatted::new(true);
                    *current.decor_mut() = decor;
                    changed = true;
                }
            }
            (_, Item::Table(inner)) => {
                changed |= patch_table(inner, snapshotter, restrict_oom);
            }
            (_, Item::Value(Value::InlineTable(inner))) => {
                changed |= patch_table(inner, snapshotter, restrict_oom);
            }
            _ => {}
        }
    }
    changed
}

/// Selects the snapshotter and applies it, plus the rootless OOM-score
/// restriction, to the containerd config.
///
/// # Errors
///
/// Returns an error if the overlay probe fails unexpectedly or the config
/// cannot be parsed or written.
pub fn configure(
    host: &Host<'_>,
    config: &NodeConfig,
    facts: &EnvironmentFacts,
) -> Result<Option<Snapshotter>> {
    let snapshotter = choose_snapshotter(config.snapshotter_override.as_ref(), facts, || {
        overlayfs::overlay_usable(host.sysroot, host.mounter)
    })?;

    let Some(text) = host.sysroot.read_optional(CONTAINERD_CONFIG)? else {
        tracing::warn!(path = CONTAINERD_CONFIG, "containerd config not found, skipping");
        return Ok(snapshotter);
    };

    if facts.userns {
        tracing::info!("UserNS: enabling restrict_oom_score_adj");
    }
    if let Some(s) = &snapshotter {
        tracing::info!(from = DEFAULT_SNAPSHOTTER, to = %s, "changing containerd snapshotter");
    }
    if let Some(patched) = patch_config(&text, snapshotter.as_ref(), facts.userns)? {
        host.sysroot.write(CONTAINERD_CONFIG, patched)?;
    }

    if snapshotter == Some(Snapshotter::FuseOverlayfs) {
        tracing::info!(unit = FUSE_OVERLAYFS_UNIT, "enabling fuse-overlayfs service");
        let enable = Invocation::new("systemctl").args(["enable", FUSE_OVERLAYFS_UNIT]);
        if let Err(e) = host.runner.run_checked(&enable) {
            tracing::warn!(error = %e, "failed to enable fuse-overlayfs service");
        }
    }
    Ok(snapshotter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysroot::Sysroot;
    use crate::testing::{RecordingMounter, ScriptedRunner};

    const CONFIG: &str = r#"
version = 2

[plugins."io.containerd.grpc.v1.cri"]
  restrict_oom_score_adj = false

[plugins."io.containerd.grpc.v1.cri".containerd]
  snapshotter = "overlayfs"
"#;

    fn facts(root_fs: FsType, userns: bool) -> EnvironmentFacts {
        EnvironmentFacts {
            root_fs,
            userns,
            ..EnvironmentFacts::default()
        }
    }

    fn overlay_ok() -> Result<bool> {
        Ok(true)
    }

    #[test]
    fn zfs_picks_native() {
        let s = choose_snapshotter(None, &facts(FsType::Zfs, false), overlay_ok).expect("choose");
        assert_eq!(s, Some(Snapshotter::Native));
    }

    #[test]
    fn fuseblk_picks_fuse_overlayfs() {
        let s = choose_snapshotter(None, &facts(FsType::Fuseblk, false), overlay_ok).expect("choose");
        assert_eq!(s, Some(Snapshotter::FuseOverlayfs));
    }

    #[test]
    fn ordinary_filesystem_keeps_default() {
        let s = choose_snapshotter(None, &facts(FsType::Ext4, false), || {
            Err(NodebootError::Validation {
                message: "overlay check must not run".into(),
            })
        })
        .expect("choose");
        assert_eq!(s, None);
    }

    #[test]
    fn override_wins_over_zfs() {
        let chosen = Snapshotter::Custom("stargz".into());
        let s = choose_snapshotter(Some(&chosen), &facts(FsType::Zfs, true), overlay_ok)
            .expect("choose");
        assert_eq!(s, Some(chosen));
    }

    #[test]
    fn rootless_selinux_avoids_overlay_without_checking_it() {
        let mut labeled = facts(FsType::Ext4, true);
        labeled.selinux_enforcing = true;
        let s = choose_snapshotter(None, &labeled, || {
            Err(NodebootError::Validation {
                message: "overlay check must not run".into(),
            })
        })
        .expect("choose");
        assert_eq!(s, Some(Snapshotter::FuseOverlayfs));
    }

    #[test]
    fn rootful_selinux_keeps_default() {
        let mut labeled = facts(FsType::Ext4, false);
        labeled.selinux_enforcing = true;
        assert_eq!(choose_snapshotter(None, &labeled, overlay_ok).expect("choose"), None);
    }

    #[test]
    fn rootless_without_overlay_falls_back_to_fuse() {
        let s = choose_snapshotter(None, &facts(FsType::Ext4, true), || Ok(false)).expect("choose");
        assert_eq!(s, Some(Snapshotter::FuseOverlayfs));
    }

    #[test]
    fn patch_rewrites_both_fields() {
        let out = patch_config(CONFIG, Some(&Snapshotter::Native), true)
            .expect("patch")
            .expect("changed");
        let doc: DocumentMut = out.parse().expect("valid toml");
        let cri = &doc["plugins"]["io.containerd.grpc.v1.cri"];
        assert_eq!(cri["restrict_oom_score_adj"].as_bool(), Some(true));
        assert_eq!(cri["containerd"]["snapshotter"].as_str(), Some("native"));
        assert_eq!(doc["version"].as_integer(), Some(2));
    }

    #[test]
    fn patch_keeps_comments_and_layout() {
        let commented = "# managed by the node image\nversion = 2\n\n\
            [plugins.\"io.containerd.grpc.v1.cri\".containerd]\n  \
            # keep in sync with the base image\n  \
            snapshotter = \"overlayfs\" # default\n  \
            default_runtime_name = \"runc\"\n";
        let out = patch_config(commented, Some(&Snapshotter::FuseOverlayfs), false)
            .expect("patch")
            .expect("changed");
        assert_eq!(
            out,
            commented.replace("\"overlayfs\" # default", "\"fuse-overlayfs\" # default")
        );
    }

    #[test]
    fn inline_tables_are_patched() {
        let text = "[plugins]\ncri = { restrict_oom_score_adj = false }\n";
        let out = patch_config(text, None, true)
            .expect("patch")
            .expect("changed");
        assert_eq!(out, "[plugins]\ncri = { restrict_oom_score_adj = true }\n");
    }

    #[test]
    fn patch_is_noop_when_already_applied() {
        let once = patch_config(CONFIG, Some(&Snapshotter::Native), true)
            .expect("patch")
            .expect("changed");
        assert!(
            patch_config(&once, Some(&Snapshotter::Native), true)
                .expect("patch")
                .is_none()
        );
    }

    #[test]
    fn rootful_leaves_oom_setting_alone() {
        assert!(patch_config(CONFIG, None, false).expect("patch").is_none());
    }

    #[test]
    fn invalid_toml_is_reported() {
        assert!(patch_config("snapshotter = ", None, true).is_err());
    }

    #[test]
    fn configure_enables_fuse_service() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Sysroot::new(dir.path());
        root.write(CONTAINERD_CONFIG, CONFIG).expect("write");
        let mounter = RecordingMounter::default();
        let runner = ScriptedRunner::default()
            .respond("systemctl enable containerd-fuse-overlayfs", "");
        let host = Host::new(&root, &mounter, &runner);

        let chosen = configure(&host, &NodeConfig::default(), &facts(FsType::Fuseblk, false))
            .expect("configure");
        assert_eq!(chosen, Some(Snapshotter::FuseOverlayfs));
        assert!(runner.ran("systemctl enable containerd-fuse-overlayfs"));
        let text = root.read_to_string(CONTAINERD_CONFIG).expect("read");
        assert!(text.contains("fuse-overlayfs"));
    }

    #[test]
    fn configure_without_config_file_still_reports_choice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Sysroot::new(dir.path());
        let mounter = RecordingMounter::default();
        let runner = ScriptedRunner::default();
        let host = Host::new(&root, &mounter, &runner);
        let chosen =
            configure(&host, &NodeConfig::default(), &facts(FsType::Zfs, false)).expect("configure");
        assert_eq!(chosen, Some(Snapshotter::Native));
    }
}
