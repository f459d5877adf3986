//! `/etc/resolv.conf` rewrite.

use std::net::Ipv4Addr;

use nodeboot_common::constants::{DOCKER_EMBEDDED_DNS, RESOLV_CONF, RESOLV_CONF_ORIGINAL};
use nodeboot_common::error::Result;
use nodeboot_common::types::DnsSearch;

use crate::host::Host;

fn is_search(line: &str) -> bool {
    line.starts_with("search")
}

/// Points nameserver entries for the embedded resolver at `target` and
/// applies the search-domain override.
///
/// A configured search list is placed first, ahead of every other line.
#[must_use]
pub fn rewrite(original: &str, target: Ipv4Addr, search: &DnsSearch) -> String {
    let replaced = original.lines().map(|line| {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some("nameserver"), Some(DOCKER_EMBEDDED_DNS)) => {
                line.replacen(DOCKER_EMBEDDED_DNS, &target.to_string(), 1)
            }
            _ => line.to_string(),
        }
    });

    let mut lines: Vec<String> = match search {
        DnsSearch::Unset => replaced.collect(),
        DnsSearch::Empty => replaced.filter(|l| !is_search(l)).collect(),
        DnsSearch::Domains(domains) => std::iter::once(format!("search {domains}"))
            .chain(replaced.filter(|l| !is_search(l)))
            .collect(),
    };
    while lines.last().is_some_and(String::is_empty) {
        let _ = lines.pop();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Keeps the engine's file as `/etc/resolv.conf.original` and writes the
/// rewritten copy in place.
///
/// # Errors
///
/// Returns an error if either file cannot be read or written.
pub fn reconcile(host: &Host<'_>, target: Ipv4Addr, search: &DnsSearch) -> Result<()> {
    host.sysroot.copy(RESOLV_CONF, RESOLV_CONF_ORIGINAL)?;
    let original = host.sysroot.read_to_string(RESOLV_CONF_ORIGINAL)?;
    host.sysroot
        .write(RESOLV_CONF, rewrite(&original, target, search))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: Ipv4Addr = Ipv4Addr::new(172, 18, 0, 1);
    const ORIGINAL: &str = "\
search corp.example lab.example
nameserver 127.0.0.11
options edns0 trust-ad ndots:0
";

    #[test]
    fn unset_search_keeps_original_lines() {
        assert_eq!(
            rewrite(ORIGINAL, TARGET, &DnsSearch::Unset),
            "search corp.example lab.example\nnameserver 172.18.0.1\noptions edns0 trust-ad ndots:0\n"
        );
    }

    #[test]
    fn empty_search_drops_search_lines() {
        let out = rewrite(ORIGINAL, TARGET, &DnsSearch::Empty);
        assert_eq!(out.lines().filter(|l| l.starts_with("search")).count(), 0);
        assert!(out.contains("nameserver 172.18.0.1\n"));
    }

    #[test]
    fn configured_search_replaces_all_search_lines() {
        let out = rewrite(
            "search a.example\nsearch b.example\nnameserver 127.0.0.11\n",
            TARGET,
            &DnsSearch::Domains("example.com".into()),
        );
        assert_eq!(out, "search example.com\nnameserver 172.18.0.1\n");
    }

    #[test]
    fn other_nameservers_are_kept() {
        let out = rewrite("nameserver 8.8.8.8\n", TARGET, &DnsSearch::Unset);
        assert_eq!(out, "nameserver 8.8.8.8\n");
    }

    #[test]
    fn reconcile_backs_up_original() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = crate::sysroot::Sysroot::new(dir.path());
        root.write(RESOLV_CONF, ORIGINAL).expect("resolv");
        let (mounter, runner) = (
            crate::testing::RecordingMounter::default(),
            crate::testing::ScriptedRunner::default(),
        );
        reconcile(&Host::new(&root, &mounter, &runner), TARGET, &DnsSearch::Empty)
            .expect("reconcile");
        assert_eq!(root.read_to_string(RESOLV_CONF_ORIGINAL).expect("backup"), ORIGINAL);
        assert!(!root.read_to_string(RESOLV_CONF).expect("resolv").contains("search"));
    }
}
