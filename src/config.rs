use crate::atlas::{AtlasError, AtlasResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory under the sandbox root holding everything mnemo owns
pub const ATLAS_DIR: &str = "atlas";

/// Sandbox location and on-disk layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    root: PathBuf,
    content_dir: String,
    tag_dir: String,
    staging_dir: String,
    index_file: Option<PathBuf>,
}

impl Config {
    /// Create a config for the sandbox at `root`, made absolute once here
    pub fn new(root: impl AsRef<Path>) -> AtlasResult<Self> {
        let root = root.as_ref();
        let root = std::path::absolute(root).map_err(|e| AtlasError::io(root, e))?;

        Ok(Self {
            root,
            content_dir: "fs".to_string(),
            tag_dir: "tags".to_string(),
            staging_dir: "staging".to_string(),
            index_file: None,
        })
    }

    /// Store the index somewhere other than `<root>/atlas/index.db`
    pub fn index_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_file = Some(path.into());
        self
    }

    pub fn content_dir(mut self, name: impl Into<String>) -> Self {
        self.content_dir = name.into();
        self
    }

    pub fn staging_dir(mut self, name: impl Into<String>) -> Self {
        self.staging_dir = name.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn atlas_root(&self) -> PathBuf {
        self.root.join(ATLAS_DIR)
    }

    pub fn content_root(&self) -> PathBuf {
        self.atlas_root().join(&self.content_dir)
    }

    pub fn tag_root(&self) -> PathBuf {
        self.atlas_root().join(&self.tag_dir)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.atlas_root().join(&self.staging_dir)
    }

    /// Held exclusively by the open `Atlas`
    pub fn lock_path(&self) -> PathBuf {
        self.atlas_root().join("lock")
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_file
            .clone()
            .unwrap_or_else(|| self.atlas_root().join("index.db"))
    }
}
