//! Filesystem access rooted at a configurable directory.
//!
//! Reconcilers name host files by their absolute in-container path
//! (`/etc/resolv.conf`). A [`Sysroot`] maps those onto a real directory,
//! which is `/` in production and a temporary tree in tests.

use std::path::{Component, Path, PathBuf};

use nodeboot_common::error::{NodebootError, Result};

/// Root directory all well-known paths are resolved against.
#[derive(Debug, Clone)]
pub struct Sysroot {
    root: PathBuf,
}

impl Sysroot {
    /// Creates a sysroot anchored at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The live system root.
    #[must_use]
    pub fn host() -> Self {
        Self::new("/")
    }

    /// Returns the directory this sysroot is anchored at.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps an absolute in-container path onto the sysroot.
    #[must_use]
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let relative: PathBuf = path
            .as_ref()
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        self.root.join(relative)
    }

    /// Maps a path under the sysroot back to its in-container form.
    #[must_use]
    pub fn unresolve(&self, full: &Path) -> PathBuf {
        full.strip_prefix(&self.root)
            .map_or_else(|_| full.to_path_buf(), |rel| Path::new("/").join(rel))
    }

    /// Resolves symlinks in an in-container path, the form the kernel records
    /// for a mount point. A path that cannot be resolved is returned as given.
    #[must_use]
    pub fn canonicalize(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let (Ok(full), Ok(root)) = (
            std::fs::canonicalize(self.resolve(path)),
            std::fs::canonicalize(&self.root),
        ) else {
            return path.to_path_buf();
        };
        full.strip_prefix(&root)
            .map_or_else(|_| path.to_path_buf(), |rel| Path::new("/").join(rel))
    }

    /// Locates an executable on the standard system `PATH` inside the
    /// sysroot, returning its in-container path.
    #[must_use]
    pub fn find_binary(&self, name: &str) -> Option<PathBuf> {
        const SYSTEM_PATH: &[&str] = &[
            "/usr/local/sbin",
            "/usr/local/bin",
            "/usr/sbin",
            "/usr/bin",
            "/sbin",
            "/bin",
        ];
        let search = std::env::join_paths(SYSTEM_PATH.iter().map(|dir| self.resolve(dir))).ok()?;
        which::which_in(name, Some(search), &self.root)
            .ok()
            .map(|full| self.unresolve(&full))
    }

    /// Whether the path exists (following symlinks).
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).exists()
    }

    /// Whether the path exists as a regular file.
    pub fn is_file(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).is_file()
    }

    /// Whether the path exists as a directory.
    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(path).is_dir()
    }

    /// Reads a file into a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_to_string(&self, path: impl AsRef<Path>) -> Result<String> {
        let full = self.resolve(path);
        std::fs::read_to_string(&full).map_err(|e| NodebootError::io(full, e))
    }

    /// Reads a file, returning `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn read_optional(&self, path: impl AsRef<Path>) -> Result<Option<String>> {
        let full = self.resolve(path);
        match std::fs::read_to_string(&full) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NodebootError::io(full, e)),
        }
    }

    /// Writes a file, creating its parent directory first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NodebootError::io(parent, e))?;
        }
        std::fs::write(&full, contents).map_err(|e| NodebootError::io(full, e))
    }

    /// Copies one file over another.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails.
    pub fn copy(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
        let from = self.resolve(from);
        let to = self.resolve(to);
        let _ = std::fs::copy(&from, &to).map_err(|e| NodebootError::io(to, e))?;
        Ok(())
    }

    /// Creates a directory and all missing parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let full = self.resolve(path);
        std::fs::create_dir_all(&full).map_err(|e| NodebootError::io(full, e))
    }

    /// Removes a file; a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let full = self.resolve(path);
        match std::fs::remove_file(&full) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(NodebootError::io(full, e)),
            _ => Ok(()),
        }
    }

    /// Removes an empty directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be removed.
    pub fn remove_dir(&self, path: impl AsRef<Path>) -> Result<()> {
        let full = self.resolve(path);
        std::fs::remove_dir(&full).map_err(|e| NodebootError::io(full, e))
    }

    /// Creates a symbolic link at `link` pointing to the in-container `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be created.
    pub fn symlink(&self, target: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
        let full = self.resolve(link);
        std::os::unix::fs::symlink(target.as_ref(), &full).map_err(|e| NodebootError::io(full, e))
    }
}

impl Default for Sysroot {
    fn default() -> Self {
        Self::host()
    }
}
