//! Environment probe: read-only inspection of the host and container.
//!
//! Every fact falls back to a conservative default when its source is
//! missing or unreadable, so probing never fails.

use std::path::Path;

use nodeboot_common::constants::{
    CGROUP_V2_CONTROLLERS, PROC_SELF_ATTR_CURRENT, PROC_SELF_CGROUP, STATE_DIR, UID_MAP,
};
use nodeboot_common::types::{CgroupMode, EnvironmentFacts};

use crate::filesystem::mount::Mounter;
use crate::namespace;
use crate::sysroot::Sysroot;

/// Gathers all environment facts.
pub fn probe(sysroot: &Sysroot, mounter: &dyn Mounter) -> EnvironmentFacts {
    let read = |path: &str| sysroot.read_optional(path).ok().flatten();

    let userns = read(UID_MAP).is_some_and(|map| namespace::user::in_user_namespace(&map));
    let controllers = read(CGROUP_V2_CONTROLLERS);
    let cgroup = cgroup_mode(controllers.is_some(), read(PROC_SELF_CGROUP).as_deref());
    let facts = EnvironmentFacts {
        userns,
        cgroup,
        root_fs: mounter.fs_type(Path::new(STATE_DIR)),
        selinux_enforcing: read(PROC_SELF_ATTR_CURRENT).is_some_and(|label| selinux_labeled(&label)),
        delegated_controllers: controllers
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        nofile_hard_limit: nofile_hard_limit(),
        hostname: hostname(),
    };
    if facts.userns {
        tracing::info!("running in a user namespace (experimental)");
    }
    tracing::info!(
        cgroup = %facts.cgroup,
        root_fs = %facts.root_fs,
        selinux = facts.selinux_enforcing,
        "probed environment"
    );
    facts
}

/// Whether a process security context is an SELinux label such as
/// `system_u:system_r:container_t:s0`. `unconfined` and `AppArmor` profiles
/// do not count.
#[must_use]
pub fn selinux_labeled(context: &str) -> bool {
    context.contains("_t:")
}

/// Resolves the cgroup layout from the presence of the v2 controller file
/// and the contents of `/proc/self/cgroup`.
#[must_use]
pub fn cgroup_mode(unified: bool, proc_self_cgroup: Option<&str>) -> CgroupMode {
    if unified {
        return CgroupMode::V2;
    }
    let current = proc_self_cgroup
        .and_then(namespace::cgroup::cpu_cgroup_path)
        .unwrap_or_default();
    if namespace::cgroup::in_cgroup_namespace(&current) {
        CgroupMode::V1Namespaced
    } else {
        CgroupMode::V1Legacy { current }
    }
}

#[cfg(target_os = "linux")]
fn nofile_hard_limit() -> Option<u64> {
    use nix::sys::resource::{Resource, getrlimit};

    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((_, hard)) if hard != libc::RLIM_INFINITY => Some(hard),
        _ => None,
    }
}

#[cfg(not(target_os = "linux"))]
const fn nofile_hard_limit() -> Option<u64> {
    None
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
}
