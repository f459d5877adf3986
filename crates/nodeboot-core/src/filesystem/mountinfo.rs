//! Parser for `/proc/<pid>/mountinfo`.

use std::path::PathBuf;

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Path within the source filesystem that forms the root of this mount.
    pub root: String,
    /// Mount point relative to the process root.
    pub mount_point: PathBuf,
    /// Filesystem type, e.g. `cgroup` or `overlay`.
    pub fs_type: String,
    /// Mount source.
    pub source: String,
    /// Per-superblock options; for cgroup v1 this lists the controllers.
    pub super_options: String,
}

impl MountEntry {
    /// Whether this is a cgroup v1 hierarchy.
    #[must_use]
    pub fn is_cgroup_v1(&self) -> bool {
        self.fs_type == "cgroup"
    }
}

/// Parses the whole mount table, skipping malformed lines.
#[must_use]
pub fn parse(text: &str) -> Vec<MountEntry> {
    text.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MountEntry> {
    let (pre, post) = line.split_once(" - ")?;
    let pre: Vec<&str> = pre.split_whitespace().collect();
    let mut post = post.split_whitespace();
    if pre.len() < 6 {
        return None;
    }
    Some(MountEntry {
        root: unescape(pre[3]),
        mount_point: PathBuf::from(unescape(pre[4])),
        fs_type: post.next()?.to_string(),
        source: unescape(post.next().unwrap_or_default()),
        super_options: post.next().unwrap_or_default().to_string(),
    })
}

/// Decodes the `\ooo` octal escapes the kernel uses for whitespace.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or_default();
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
