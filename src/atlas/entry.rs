use super::{AtlasError, AtlasResult};
use crate::security::TagName;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Which subtree of the sandbox a logical path lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    Current,
    Tagged(TagName),
}

/// What a path named at the moment it was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceStatus {
    Absent,
    File { size: u64 },
    Directory,
}

impl ResourceStatus {
    pub(crate) fn inspect(physical: &Path) -> AtlasResult<Self> {
        match fs::metadata(physical) {
            Ok(meta) if meta.is_dir() => Ok(ResourceStatus::Directory),
            Ok(meta) => Ok(ResourceStatus::File { size: meta.len() }),
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
                Ok(ResourceStatus::Absent)
            }
            Err(e) => Err(AtlasError::io(physical, e)),
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, ResourceStatus::Absent)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, ResourceStatus::File { .. })
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, ResourceStatus::Directory)
    }
}

/// Output of lexical resolution: a normalized logical path and the
/// sandbox-contained location it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalPath {
    logical: String,
    namespace: Namespace,
    physical: PathBuf,
}

impl PhysicalPath {
    pub(crate) fn new(logical: String, namespace: Namespace, physical: PathBuf) -> Self {
        Self {
            logical,
            namespace,
            physical,
        }
    }

    /// Normalized logical path, `""` for the content root
    pub fn logical(&self) -> &str {
        &self.logical
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn as_path(&self) -> &Path {
        &self.physical
    }

    pub fn is_root(&self) -> bool {
        self.logical.is_empty()
    }

    /// Display form used in errors and logs
    pub(crate) fn display_name(&self) -> String {
        match &self.namespace {
            Namespace::Current => format!("/{}", self.logical),
            Namespace::Tagged(tag) => format!("tag/{}/{}", tag, self.logical),
        }
    }
}

/// A resolved path together with a snapshot of the resource's status.
///
/// Produced once per operation and threaded through it; the status is not
/// re-read afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    target: PhysicalPath,
    status: ResourceStatus,
}

impl ResolvedPath {
    pub(crate) fn inspect(target: PhysicalPath) -> AtlasResult<Self> {
        let status = ResourceStatus::inspect(target.as_path())?;
        Ok(Self { target, status })
    }

    pub fn target(&self) -> &PhysicalPath {
        &self.target
    }

    pub fn logical(&self) -> &str {
        self.target.logical()
    }

    pub fn namespace(&self) -> &Namespace {
        self.target.namespace()
    }

    pub fn as_path(&self) -> &Path {
        self.target.as_path()
    }

    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    pub fn is_root(&self) -> bool {
        self.target.is_root()
    }

    pub(crate) fn display_name(&self) -> String {
        self.target.display_name()
    }
}
