//! Composition of `Atlas` and `Index`.
//!
//! Each mutation is a local two-step sequence run under the path lock:
//! change the content, then bring the index row in line. There is no
//! transaction spanning both; when the second step fails the content change
//! stands and the caller gets `StoreError::Reconcile`.

use crate::atlas::{Atlas, AtlasError, ResolvedPath, ResourceStatus};
use crate::config::Config;
use crate::hash::hash_reader;
use crate::index::{Index, IndexRow};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    /// The content operation itself failed; nothing was changed
    #[error(transparent)]
    Content(#[from] AtlasError),

    /// Content changed but the index could not be updated to match
    #[error("Index out of sync for {path}: {source}")]
    Reconcile {
        path: String,
        #[source]
        source: AtlasError,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of comparing stored bytes against their index row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Verification {
    Intact,
    Modified { recorded: IndexRow, actual: IndexRow },
    Unindexed { actual: IndexRow },
    MissingContent { recorded: IndexRow },
}

impl Verification {
    pub fn is_intact(&self) -> bool {
        matches!(self, Verification::Intact)
    }
}

#[derive(Debug)]
pub struct Store {
    atlas: Atlas,
    index: Index,
}

impl Store {
    /// Provision the sandbox and open its index
    pub fn open(config: &Config) -> StoreResult<Self> {
        let atlas = Atlas::open(config)?;
        let index = Index::open(config.index_path())?;
        index.init()?;
        Ok(Self::new(atlas, index))
    }

    /// Compose an existing atlas and an initialized index
    pub fn new(atlas: Atlas, index: Index) -> Self {
        Self { atlas, index }
    }

    pub fn atlas(&self) -> &Atlas {
        &self.atlas
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Store everything `reader` yields at `path` and record it in the index
    pub fn put<R: Read>(&self, path: &str, mut reader: R) -> StoreResult<IndexRow> {
        let mut writer = self.atlas.write(path)?;
        io::copy(&mut reader, &mut writer)
            .map_err(|e| AtlasError::io(Path::new(writer.logical_path()), e))?;

        let committed = writer.commit()?;
        let receipt = committed.receipt();

        if let Err(source) = self
            .index
            .put_replacing(&receipt.path, receipt.size, &receipt.hash)
        {
            warn!(path = %receipt.path, error = %source, "content written but index not updated");
            return Err(StoreError::Reconcile {
                path: receipt.path.clone(),
                source,
            });
        }

        let receipt = committed.into_receipt();
        Ok(IndexRow {
            path: receipt.path,
            size: receipt.size,
            hash: receipt.hash,
        })
    }

    /// Remove content at `path` along with its index rows (all of them,
    /// when `path` was a directory)
    pub fn delete(&self, path: &str) -> StoreResult<()> {
        let (logical, _guard) = self.atlas.delete_held(path)?;

        if let Err(source) = self.index.delete_under(&logical) {
            warn!(path = %logical, error = %source, "content deleted but index row remains");
            return Err(StoreError::Reconcile {
                path: logical,
                source,
            });
        }

        Ok(())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.atlas.exists(path)
    }

    pub fn stat(&self, path: &str) -> StoreResult<ResourceStatus> {
        Ok(self.atlas.stat(path)?)
    }

    pub fn list(&self, path: &str) -> StoreResult<Vec<String>> {
        Ok(self.atlas.list(path)?)
    }

    pub fn tree(&self, path: &str) -> StoreResult<Vec<String>> {
        Ok(self.atlas.tree(path)?)
    }

    pub fn read(&self, path: &str) -> StoreResult<File> {
        Ok(self.atlas.read(path)?)
    }

    /// Index row for a logical path, looked up by its normalized form
    pub fn row(&self, path: &str) -> StoreResult<IndexRow> {
        let target = self.atlas.resolver().resolve(path)?;
        Ok(self.index.get_path(target.logical())?)
    }

    /// Re-hash stored bytes and compare them with the recorded row
    pub fn verify(&self, path: &str) -> StoreResult<Verification> {
        let target = self.atlas.resolver().resolve(path)?;
        let _guard = self.atlas.hold(target.logical());
        let resolved = ResolvedPath::inspect(target)?;

        self.verify_resolved(&resolved)
    }

    fn verify_resolved(&self, resolved: &ResolvedPath) -> StoreResult<Verification> {
        let recorded = match self.index.get_path(resolved.logical()) {
            Ok(row) => Some(row),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let verification = match (resolved.status(), recorded) {
            (ResourceStatus::Directory, _) => {
                return Err(AtlasError::NotAFile(resolved.logical().to_string()).into())
            }
            (ResourceStatus::Absent, None) => {
                return Err(AtlasError::ResourceNotFound(resolved.logical().to_string()).into())
            }
            (ResourceStatus::Absent, Some(recorded)) => Verification::MissingContent { recorded },
            (ResourceStatus::File { .. }, recorded) => {
                let file = self.atlas.read_resolved(resolved)?;
                let (size, hash) =
                    hash_reader(file).map_err(|e| AtlasError::io(resolved.as_path(), e))?;
                let actual = IndexRow {
                    path: resolved.logical().to_string(),
                    size,
                    hash,
                };

                match recorded {
                    None => Verification::Unindexed { actual },
                    Some(recorded) if recorded == actual => Verification::Intact,
                    Some(recorded) => Verification::Modified { recorded, actual },
                }
            }
        };

        if !verification.is_intact() {
            warn!(path = resolved.logical(), ?verification, "integrity check failed");
        }
        Ok(verification)
    }

    /// Verify every file and every index row beneath a directory.
    ///
    /// Returns only the paths that are not intact, ordered by path. A
    /// directory that is gone but still has rows beneath it is audited from
    /// the index alone.
    pub fn audit(&self, path: &str) -> StoreResult<Vec<(String, Verification)>> {
        let base = self.atlas.resolve(path)?;
        let prefix = base.logical().to_string();
        let join = |rel: &str| {
            if prefix.is_empty() {
                rel.to_string()
            } else {
                format!("{}/{}", prefix, rel)
            }
        };

        let recorded = self.index.paths_under(&prefix)?;
        let mut paths: Vec<String> = match base.status() {
            ResourceStatus::Absent if recorded.is_empty() => {
                return Err(AtlasError::ResourceNotFound(base.display_name()).into())
            }
            ResourceStatus::Absent => Vec::new(),
            _ => self
                .atlas
                .tree_resolved(&base)?
                .iter()
                .map(|rel| join(rel.as_str()))
                .collect(),
        };
        paths.extend(recorded.into_iter().map(|row| row.path));
        paths.sort();
        paths.dedup();

        let mut findings = Vec::new();
        for logical in paths {
            let _guard = self.atlas.hold(&logical);
            let resolved = self.atlas.resolve(&logical)?;
            if resolved.status().is_dir() {
                // an index row naming what is now a directory
                match self.index.get_path(&logical) {
                    Ok(recorded) => {
                        findings.push((logical, Verification::MissingContent { recorded }))
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
                continue;
            }
            let verification = match self.verify_resolved(&resolved) {
                Ok(v) => v,
                // removed between the listing and now
                Err(StoreError::Content(e)) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if !verification.is_intact() {
                findings.push((logical, verification));
            }
        }

        info!(path = %base.logical(), problems = findings.len(), "audit finished");
        Ok(findings)
    }
}
