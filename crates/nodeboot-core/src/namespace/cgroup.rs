//! Cgroup namespace detection from `/proc/self/cgroup`.

/// Returns the cgroup path of the `cpu` controller.
///
/// Under cgroup v2 the single `0::<path>` line is used.
#[must_use]
pub fn cpu_cgroup_path(proc_self_cgroup: &str) -> Option<String> {
    let mut unified = None;
    for line in proc_self_cgroup.lines() {
        let mut fields = line.splitn(3, ':');
        let (Some(_id), Some(controllers), Some(path)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if controllers.split(',').any(|c| c == "cpu") {
            return Some(path.to_string());
        }
        if controllers.is_empty() {
            unified = Some(path.to_string());
        }
    }
    unified
}

/// A private cgroup namespace makes the process's own cgroup read as `/`.
#[must_use]
pub fn in_cgroup_namespace(cpu_path: &str) -> bool {
    cpu_path == "/"
}
