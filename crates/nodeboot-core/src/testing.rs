//! In-memory fakes for [`Mounter`] and [`CommandRunner`].
//!
//! Used by this crate's tests and, with the `testing` feature, by
//! integration tests that drive the reconcilers without real namespaces.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use nodeboot_common::error::{NodebootError, Result};
use nodeboot_common::types::FsType;

use crate::command::{CommandOutput, CommandRunner, Invocation};
use crate::filesystem::mount::{Mounter, Propagation};
use crate::filesystem::mountinfo::MountEntry;
use crate::filesystem::overlayfs::OverlayConfig;
use crate::sysroot::Sysroot;

/// Records every mount call and keeps a simulated mount table.
#[derive(Debug, Default)]
pub struct RecordingMounter {
    calls: RefCell<Vec<String>>,
    table: RefCell<Vec<MountEntry>>,
    failures: Vec<(String, Option<PathBuf>, i32)>,
    fs_types: HashMap<PathBuf, FsType>,
    sysroot: Option<Sysroot>,
}

impl RecordingMounter {
    /// Seeds the simulated mount table.
    #[must_use]
    pub fn with_mounts(self, entries: Vec<MountEntry>) -> Self {
        *self.table.borrow_mut() = entries;
        self
    }

    /// Records mount points with symlinks resolved inside `sysroot`, the way
    /// the kernel does.
    #[must_use]
    pub fn rooted(mut self, sysroot: &Sysroot) -> Self {
        self.sysroot = Some(sysroot.clone());
        self
    }

    /// Makes every `operation` fail with `errno`.
    #[must_use]
    pub fn failing(mut self, operation: &str, errno: i32) -> Self {
        self.failures.push((operation.to_string(), None, errno));
        self
    }

    /// Makes `operation` on `target` fail with `errno`.
    #[must_use]
    pub fn failing_at(mut self, operation: &str, target: impl Into<PathBuf>, errno: i32) -> Self {
        self.failures
            .push((operation.to_string(), Some(target.into()), errno));
        self
    }

    /// Reports `fs_type` for `path`.
    #[must_use]
    pub fn with_fs_type(mut self, path: impl Into<PathBuf>, fs_type: FsType) -> Self {
        let _ = self.fs_types.insert(path.into(), fs_type);
        self
    }

    /// Calls made so far, e.g. `bind-ro /kind/product_uuid /sys/...`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Number of recorded calls starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, operation: &str, target: &Path, call: String) -> Result<()> {
        let failure = self.failures.iter().find(|(op, at, _)| {
            op == operation && at.as_ref().is_none_or(|t| t.as_path() == target)
        });
        if let Some((_, _, errno)) = failure {
            return Err(NodebootError::Mount {
                operation: "simulated",
                target: target.to_path_buf(),
                source: std::io::Error::from_raw_os_error(*errno),
            });
        }
        self.calls.borrow_mut().push(call);
        Ok(())
    }

    fn canonical(&self, path: &Path) -> PathBuf {
        self.sysroot
            .as_ref()
            .map_or_else(|| path.to_path_buf(), |root| root.canonicalize(path))
    }

    fn add_mount(&self, source: &Path, target: &Path, fs_type: &str) {
        self.table.borrow_mut().push(MountEntry {
            root: source.display().to_string(),
            mount_point: self.canonical(target),
            fs_type: fs_type.to_string(),
            source: source.display().to_string(),
            super_options: String::new(),
        });
    }
}

impl Mounter for RecordingMounter {
    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        self.record(
            "bind",
            target,
            format!("bind {} {}", source.display(), target.display()),
        )?;
        self.add_mount(source, target, "bind");
        Ok(())
    }

    fn bind_readonly(&self, source: &Path, target: &Path) -> Result<()> {
        self.record(
            "bind-ro",
            target,
            format!("bind-ro {} {}", source.display(), target.display()),
        )?;
        self.add_mount(source, target, "bind");
        Ok(())
    }

    fn remount_readonly(&self, target: &Path) -> Result<()> {
        self.record(
            "remount-ro",
            target,
            format!("remount-ro {}", target.display()),
        )
    }

    fn set_propagation(&self, target: &Path, propagation: Propagation) -> Result<()> {
        let name = match propagation {
            Propagation::Shared => "make-rshared",
            Propagation::Private => "make-rprivate",
        };
        self.record(name, target, format!("{name} {}", target.display()))
    }

    fn mount_overlay(&self, config: &OverlayConfig) -> Result<()> {
        self.record(
            "overlay",
            &config.merged_dir,
            format!("overlay {}", config.merged_dir.display()),
        )?;
        self.add_mount(Path::new("overlay"), &config.merged_dir, "overlay");
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        self.record("umount", target, format!("umount {}", target.display()))?;
        let target = self.canonical(target);
        let mut table = self.table.borrow_mut();
        if let Some(pos) = table.iter().rposition(|e| e.mount_point == target) {
            let _ = table.remove(pos);
        }
        Ok(())
    }

    fn mount_table(&self) -> Result<Vec<MountEntry>> {
        Ok(self.table.borrow().clone())
    }

    fn is_mount_point(&self, target: &Path) -> Result<bool> {
        let target = self.canonical(target);
        Ok(self.table.borrow().iter().any(|e| e.mount_point == target))
    }

    fn fs_type(&self, path: &Path) -> FsType {
        self.fs_types.get(path).cloned().unwrap_or(FsType::Ext4)
    }

    fn sync(&self) {
        self.calls.borrow_mut().push("sync".to_string());
    }
}

enum Scripted {
    Output(CommandOutput),
    SpawnError,
}

/// Returns canned output per command line and records every invocation.
///
/// Unscripted commands behave like a missing binary: exit status 127.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: HashMap<String, Scripted>,
    invocations: RefCell<Vec<Invocation>>,
}

impl ScriptedRunner {
    /// Scripts a successful run printing `stdout`.
    #[must_use]
    pub fn respond(mut self, command_line: &str, stdout: &str) -> Self {
        let _ = self.responses.insert(
            command_line.to_string(),
            Scripted::Output(CommandOutput {
                status: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        );
        self
    }

    /// Scripts a run exiting with `status`.
    #[must_use]
    pub fn exit(mut self, command_line: &str, status: i32) -> Self {
        let _ = self.responses.insert(
            command_line.to_string(),
            Scripted::Output(CommandOutput {
                status: Some(status),
                stdout: String::new(),
                stderr: format!("{command_line}: failed"),
            }),
        );
        self
    }

    /// Scripts a run that cannot be spawned or times out.
    #[must_use]
    pub fn error(mut self, command_line: &str) -> Self {
        let _ = self
            .responses
            .insert(command_line.to_string(), Scripted::SpawnError);
        self
    }

    /// Every invocation made so far.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    /// Command lines run so far.
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(Invocation::command_line)
            .collect()
    }

    /// Whether `command_line` was run.
    pub fn ran(&self, command_line: &str) -> bool {
        self.command_lines().iter().any(|c| c == command_line)
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.invocations.borrow_mut().push(invocation.clone());
        let line = invocation.command_line();
        match self.responses.get(&line) {
            Some(Scripted::Output(out)) => Ok(out.clone()),
            Some(Scripted::SpawnError) => Err(NodebootError::Command {
                program: line,
                message: "timed out after 5s".into(),
            }),
            None => Ok(CommandOutput {
                status: Some(127),
                stdout: String::new(),
                stderr: format!("{}: command not found", invocation.program),
            }),
        }
    }
}
