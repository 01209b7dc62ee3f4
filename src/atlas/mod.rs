mod entry;
mod error;
mod locks;
mod writer;

#[cfg(test)]
mod tests;

pub use entry::{Namespace, PhysicalPath, ResolvedPath, ResourceStatus};
pub use error::{AtlasError, AtlasResult};
pub use locks::{PathGuard, PathLocks};
pub use writer::{AtlasWriter, Committed, WriteReceipt};

use crate::config::Config;
use crate::security::PathResolver;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Filesystem operations confined to a sandbox root.
///
/// Every call resolves its logical path first; a resolution failure is
/// returned before any storage access. Mutations on the same logical path
/// are serialized through a path-keyed lock table; reads take no lock.
///
/// At most one `Atlas` may have a sandbox open at a time; the lock file is
/// released when it is dropped.
#[derive(Debug)]
pub struct Atlas {
    resolver: PathResolver,
    staging: PathBuf,
    locks: PathLocks,
    _lock: File,
}

impl Atlas {
    /// Provision the sandbox directory structure and open it
    pub fn open(config: &Config) -> AtlasResult<Self> {
        for dir in [
            config.root().to_path_buf(),
            config.content_root(),
            config.tag_root(),
            config.staging_root(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| AtlasError::io(&dir, e))?;
        }

        let lock = Self::lock_sandbox(&config.lock_path())?;
        let atlas = Self {
            resolver: PathResolver::new(config.content_root(), config.tag_root()),
            staging: config.staging_root(),
            locks: PathLocks::new(),
            _lock: lock,
        };
        atlas.sweep_staging()?;

        info!(root = %config.root().display(), "atlas opened");
        Ok(atlas)
    }

    fn lock_sandbox(path: &Path) -> AtlasResult<File> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| AtlasError::io(path, e))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(file),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                warn!(lock = %path.display(), "sandbox already open");
                Err(AtlasError::Busy(path.display().to_string()))
            }
            Err(e) => Err(AtlasError::io(path, e)),
        }
    }

    /// Remove staged files left behind by writes that never committed
    fn sweep_staging(&self) -> AtlasResult<()> {
        let entries = fs::read_dir(&self.staging).map_err(|e| AtlasError::io(&self.staging, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| AtlasError::io(&self.staging, e))?;
            let path = entry.path();
            debug!(path = %path.display(), "removing stale staged file");
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| AtlasError::io(&path, e))?;
        }
        Ok(())
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn content_root(&self) -> &Path {
        self.resolver.content_root()
    }

    /// Resolve a logical path and snapshot the resource's status
    pub fn resolve(&self, path: &str) -> AtlasResult<ResolvedPath> {
        ResolvedPath::inspect(self.resolver.resolve(path)?)
    }

    /// Resolve a logical path inside a tag's namespace
    pub fn resolve_tagged(&self, tag: &str, path: &str) -> AtlasResult<ResolvedPath> {
        ResolvedPath::inspect(self.resolver.resolve_tagged(tag, path)?)
    }

    /// True iff the path resolves and something exists there
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path)
            .map(|resolved| resolved.status().exists())
            .unwrap_or(false)
    }

    /// Strict form of `exists`: resolution and I/O errors are surfaced
    pub fn stat(&self, path: &str) -> AtlasResult<ResourceStatus> {
        Ok(self.resolve(path)?.status())
    }

    /// Names of the immediate children of a directory
    pub fn list(&self, path: &str) -> AtlasResult<Vec<String>> {
        self.list_resolved(&self.resolve(path)?)
    }

    pub fn list_resolved(&self, resolved: &ResolvedPath) -> AtlasResult<Vec<String>> {
        Self::require_dir(resolved)?;

        let dir = resolved.as_path();
        let entries = fs::read_dir(dir).map_err(|e| AtlasError::io(dir, e))?;

        entries
            .map(|entry| {
                entry
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .map_err(|e| AtlasError::io(dir, e))
            })
            .collect()
    }

    /// Every regular file beneath a directory, relative to it, with `/`
    /// separators. Directories are never emitted.
    pub fn tree(&self, path: &str) -> AtlasResult<Vec<String>> {
        self.tree_resolved(&self.resolve(path)?)
    }

    pub fn tree_resolved(&self, resolved: &ResolvedPath) -> AtlasResult<Vec<String>> {
        Self::require_dir(resolved)?;

        let base = resolved.as_path();
        let mut files = Vec::new();

        for entry in WalkDir::new(base).min_depth(1) {
            let entry = entry.map_err(|e| {
                let at = e.path().unwrap_or(base).to_path_buf();
                AtlasError::io(&at, io::Error::from(e))
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(base)
                .map_err(|e| AtlasError::io(entry.path(), io::Error::other(e)))?;

            let parts: Vec<String> = rel
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect();
            files.push(parts.join("/"));
        }

        Ok(files)
    }

    /// Open a full-replace write to `path`.
    ///
    /// The path is locked for the writer's lifetime (and the returned
    /// `Committed`'s, once committed). Parent directories are created here.
    /// Locks are not reentrant: writing, deleting or verifying the same path
    /// or an ancestor from the thread holding the writer deadlocks.
    pub fn write(&self, path: &str) -> AtlasResult<AtlasWriter> {
        let target = self.resolver.resolve(path)?;
        Self::require_mutable(&target)?;

        let guard = self.locks.acquire(target.logical());

        if let Some(parent) = target.as_path().parent() {
            fs::create_dir_all(parent).map_err(|e| AtlasError::io(parent, e))?;
        }

        let staged =
            NamedTempFile::new_in(&self.staging).map_err(|e| AtlasError::io(&self.staging, e))?;

        debug!(path = %target.display_name(), staged = %staged.path().display(), "write opened");
        Ok(AtlasWriter::new(staged, target, guard))
    }

    /// Open a file for reading
    pub fn read(&self, path: &str) -> AtlasResult<File> {
        self.read_resolved(&self.resolve(path)?)
    }

    pub fn read_resolved(&self, resolved: &ResolvedPath) -> AtlasResult<File> {
        match resolved.status() {
            ResourceStatus::Absent => Err(AtlasError::ResourceNotFound(resolved.display_name())),
            ResourceStatus::Directory => Err(AtlasError::NotAFile(resolved.display_name())),
            ResourceStatus::File { .. } => {
                File::open(resolved.as_path()).map_err(|e| Self::vanished(resolved, e))
            }
        }
    }

    /// Remove a file or a whole directory subtree
    pub fn delete(&self, path: &str) -> AtlasResult<()> {
        self.delete_held(path).map(|_| ())
    }

    /// Delete and hand back the still-held path lock, so the caller can
    /// finish its own bookkeeping before the path is released.
    pub(crate) fn delete_held(&self, path: &str) -> AtlasResult<(String, PathGuard)> {
        let target = self.resolver.resolve(path)?;
        Self::require_mutable(&target)?;

        let guard = self.locks.acquire(target.logical());
        let resolved = ResolvedPath::inspect(target)?;

        let removed = match resolved.status() {
            ResourceStatus::Absent => {
                return Err(AtlasError::ResourceNotFound(resolved.display_name()))
            }
            ResourceStatus::Directory => fs::remove_dir_all(resolved.as_path()),
            ResourceStatus::File { .. } => fs::remove_file(resolved.as_path()),
        };
        removed.map_err(|e| Self::vanished(&resolved, e))?;

        info!(path = %resolved.display_name(), "deleted");
        Ok((resolved.logical().to_string(), guard))
    }

    /// Hold the lock for a logical path without mutating it
    pub(crate) fn hold(&self, logical: &str) -> PathGuard {
        self.locks.acquire(logical)
    }

    fn require_dir(resolved: &ResolvedPath) -> AtlasResult<()> {
        match resolved.status() {
            ResourceStatus::Directory => Ok(()),
            ResourceStatus::File { .. } => Err(AtlasError::NotAFolder(resolved.display_name())),
            ResourceStatus::Absent => Err(AtlasError::ResourceNotFound(resolved.display_name())),
        }
    }

    fn require_mutable(target: &PhysicalPath) -> AtlasResult<()> {
        if let Namespace::Tagged(_) = target.namespace() {
            return Err(AtlasError::TagReadOnly(target.display_name()));
        }
        if target.is_root() {
            return Err(AtlasError::UploadToRoot);
        }
        Ok(())
    }

    /// Map an I/O error on a path whose status said it existed
    fn vanished(resolved: &ResolvedPath, e: io::Error) -> AtlasError {
        if e.kind() == io::ErrorKind::NotFound {
            AtlasError::ResourceNotFound(resolved.display_name())
        } else {
            AtlasError::io(resolved.as_path(), e)
        }
    }
}
