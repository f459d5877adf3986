//! User namespace detection.
//!
//! The initial user namespace maps the full UID range onto itself with the
//! single line `0 0 4294967295`. Any other mapping means the container
//! engine started us in a remapped (rootless or userns-remap) namespace.

/// Returns whether `uid_map` describes a non-initial user namespace.
#[must_use]
pub fn in_user_namespace(uid_map: &str) -> bool {
    uid_map
        .lines()
        .filter(|line| !line.trim().is_empty())
        .any(|line| line.split_whitespace().ne(["0", "0", "4294967295"]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_mapping_is_initial_namespace() {
        assert!(!in_user_namespace("         0          0 4294967295\n"));
    }

    #[test]
    fn remapped_range_is_user_namespace() {
        assert!(in_user_namespace("         0     100000      65536\n"));
    }

    #[test]
    fn partial_identity_is_user_namespace() {
        assert!(in_user_namespace("0 0 1\n1 100000 65535\n"));
    }

    #[test]
    fn empty_map_is_not_namespaced() {
        assert!(!in_user_namespace(""));
    }
}
