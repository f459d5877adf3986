//! Bundle of the host backends every reconciler works through.

use crate::command::CommandRunner;
use crate::filesystem::mount::Mounter;
use crate::sysroot::Sysroot;

/// Borrowed handles to the filesystem, mount table and command runner.
#[derive(Clone, Copy)]
pub struct Host<'a> {
    /// Root all well-known paths resolve against.
    pub sysroot: &'a Sysroot,
    /// Mount operations.
    pub mounter: &'a dyn Mounter,
    /// External commands.
    pub runner: &'a dyn CommandRunner,
}

impl<'a> Host<'a> {
    /// Bundles the three backends.
    pub const fn new(
        sysroot: &'a Sysroot,
        mounter: &'a dyn Mounter,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            sysroot,
            mounter,
            runner,
        }
    }
}
