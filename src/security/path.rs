use crate::atlas::{AtlasError, AtlasResult, Namespace, PhysicalPath};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{trace, warn};

/// Validated tag name: word characters, hyphen, dot and space only
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagName(String);

impl TagName {
    pub fn parse(raw: &str) -> AtlasResult<Self> {
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ');

        if raw.is_empty() || !raw.chars().all(allowed) || raw == "." || raw == ".." {
            return Err(AtlasError::InvalidTag(raw.to_string()));
        }

        Ok(TagName(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps logical paths onto physical locations inside the sandbox.
///
/// Resolution is purely lexical and never touches the filesystem. Callers
/// that need the resource's state should go through `Atlas::resolve`, which
/// snapshots it once.
#[derive(Debug, Clone)]
pub struct PathResolver {
    content_root: PathBuf,
    tag_root: PathBuf,
}

impl PathResolver {
    pub fn new(content_root: impl Into<PathBuf>, tag_root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
            tag_root: tag_root.into(),
        }
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    pub fn tag_root(&self) -> &Path {
        &self.tag_root
    }

    /// Normalize a logical path into its canonical root-relative form.
    ///
    /// - `.` segments and redundant separators are dropped
    /// - `..` pops the previous segment; popping past the root is an escape
    /// - `""` and `/` name the content root and normalize to `""`
    /// - any other absolute path (or drive prefix) is rejected
    pub fn normalize(raw: &str) -> AtlasResult<String> {
        if raw.trim_matches('/').is_empty() {
            return Ok(String::new());
        }

        let mut components: Vec<String> = Vec::new();

        for component in Path::new(raw).components() {
            match component {
                Component::Prefix(_) | Component::RootDir => {
                    warn!(path = raw, "rejected absolute path");
                    return Err(AtlasError::PathEscape(raw.to_string()));
                }
                Component::ParentDir => {
                    if components.pop().is_none() {
                        warn!(path = raw, "rejected path escaping the sandbox");
                        return Err(AtlasError::PathEscape(raw.to_string()));
                    }
                }
                Component::CurDir => continue,
                Component::Normal(part) => components.push(part.to_string_lossy().into_owned()),
            }
        }

        Ok(components.join("/"))
    }

    /// Resolve a logical path in the current namespace
    pub fn resolve(&self, raw: &str) -> AtlasResult<PhysicalPath> {
        let logical = Self::normalize(raw)?;
        let physical = Self::contained(&self.content_root, &logical, raw)?;

        trace!(path = raw, logical = %logical, physical = %physical.display(), "resolved");
        Ok(PhysicalPath::new(logical, Namespace::Current, physical))
    }

    /// Resolve a logical path inside the namespace of `tag`
    pub fn resolve_tagged(&self, tag: &str, raw: &str) -> AtlasResult<PhysicalPath> {
        let tag = TagName::parse(tag)?;
        let logical = Self::normalize(raw)?;
        let physical = Self::contained(&self.tag_root.join(tag.as_str()), &logical, raw)?;

        trace!(tag = %tag, logical = %logical, physical = %physical.display(), "resolved tagged");
        Ok(PhysicalPath::new(logical, Namespace::Tagged(tag), physical))
    }

    /// Join a normalized logical path under `base` and confirm the result
    /// stays beneath it.
    fn contained(base: &Path, logical: &str, raw: &str) -> AtlasResult<PathBuf> {
        let physical = logical
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(base.to_path_buf(), |acc, part| acc.join(part));

        let escapes = match physical.strip_prefix(base) {
            Ok(rel) => rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_))),
            Err(_) => true,
        };

        if escapes {
            warn!(path = raw, "resolved outside of sandbox");
            return Err(AtlasError::PathEscape(raw.to_string()));
        }

        Ok(physical)
    }
}
