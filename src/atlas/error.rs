use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AtlasError {
    #[error("Path escapes sandbox root: {0}")]
    PathEscape(String),

    #[error("Cannot write to root")]
    UploadToRoot,

    #[error("Resource does not exist: {0}")]
    ResourceNotFound(String),

    #[error("Expecting file, found folder: {0}")]
    NotAFile(String),

    #[error("Expecting folder, found file: {0}")]
    NotAFolder(String),

    #[error("Tag is not valid: {0}")]
    InvalidTag(String),

    #[error("Tagged paths are read-only: {0}")]
    TagReadOnly(String),

    #[error("Sandbox is already open elsewhere: {0}")]
    Busy(String),

    #[error("I/O failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Index failure ({context}): {source}")]
    Index {
        context: String,
        #[source]
        source: rusqlite::Error,
    },
}

impl AtlasError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        AtlasError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn index(context: impl Into<String>, source: rusqlite::Error) -> Self {
        AtlasError::Index {
            context: context.into(),
            source,
        }
    }

    /// True for the "nothing there" outcome, whether from Atlas or Index
    pub fn is_not_found(&self) -> bool {
        matches!(self, AtlasError::ResourceNotFound(_))
    }
}

pub type AtlasResult<T> = Result<T, AtlasError>;
