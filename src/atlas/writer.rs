use super::locks::PathGuard;
use super::{AtlasError, AtlasResult, PhysicalPath};
use crate::hash::ContentHasher;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Size and fingerprint of the bytes a write actually persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteReceipt {
    pub path: String,
    pub size: u64,
    pub hash: String,
}

/// Sink for a full-replace write.
///
/// Bytes go to a staging file inside the sandbox; the target path is only
/// touched by `commit`, which renames the staged file over it. Dropping the
/// writer without committing discards the staged bytes.
#[derive(Debug)]
pub struct AtlasWriter {
    staged: NamedTempFile,
    target: PhysicalPath,
    hasher: ContentHasher,
    guard: PathGuard,
}

impl AtlasWriter {
    pub(crate) fn new(staged: NamedTempFile, target: PhysicalPath, guard: PathGuard) -> Self {
        Self {
            staged,
            target,
            hasher: ContentHasher::new(),
            guard,
        }
    }

    pub fn logical_path(&self) -> &str {
        self.target.logical()
    }

    pub fn bytes_written(&self) -> u64 {
        self.hasher.size()
    }

    /// Install the staged content at the target path
    pub fn commit(self) -> AtlasResult<Committed> {
        let AtlasWriter {
            mut staged,
            target,
            hasher,
            guard,
        } = self;
        let physical = target.as_path();

        staged
            .flush()
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| AtlasError::io(staged.path(), e))?;

        // A concurrent delete of an ancestor may have removed the parent.
        if let Some(parent) = physical.parent() {
            fs::create_dir_all(parent).map_err(|e| AtlasError::io(parent, e))?;
        }

        // rename cannot replace a directory, so clear one out first
        if let Ok(meta) = fs::symlink_metadata(physical) {
            if meta.is_dir() {
                debug!(path = %target.display_name(), "replacing directory with file");
                fs::remove_dir_all(physical).map_err(|e| AtlasError::io(physical, e))?;
            }
        }

        staged
            .persist(physical)
            .map_err(|e| AtlasError::io(physical, e.error))?;

        let (size, hash) = hasher.finish();
        info!(path = %target.display_name(), size, hash = %hash, "write committed");

        Ok(Committed {
            receipt: WriteReceipt {
                path: target.logical().to_string(),
                size,
                hash,
            },
            _guard: guard,
        })
    }
}

impl Write for AtlasWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.staged.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.staged.flush()
    }
}

/// A committed write. The path stays locked until this is dropped, so
/// follow-up bookkeeping can run before anyone else touches the path.
/// Mutating or verifying the path (or an ancestor) from the same thread
/// while this is alive deadlocks; call `into_receipt` first.
#[derive(Debug)]
pub struct Committed {
    receipt: WriteReceipt,
    _guard: PathGuard,
}

impl Committed {
    pub fn receipt(&self) -> &WriteReceipt {
        &self.receipt
    }

    /// Release the path lock and keep the receipt
    pub fn into_receipt(self) -> WriteReceipt {
        self.receipt
    }
}
