//! VOD identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Stable identifier for a recorded VOD.
///
/// Derived from the source file as `<channel>/<file name>` (or the full path
/// relative to the recordings root), so re-triggering the same artifact
/// always yields the same id. Used as the ledger key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VodId(pub String);

impl VodId {
    /// Create from an externally supplied identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the id for a source file.
    ///
    /// Both paths are made absolute first, so the id does not depend on how
    /// they were spelled. When `source` lies under `root` the id is the
    /// relative path with `/` separators; otherwise it is
    /// `<parent dir name>/<file name>`.
    pub fn from_source(source: &Path, root: Option<&Path>) -> Self {
        let source = absolute_path(source);
        if let Some(root) = root.map(absolute_path) {
            if let Ok(relative) = source.strip_prefix(&root) {
                let parts: Vec<String> = relative
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect();
                if !parts.is_empty() {
                    return Self(parts.join("/"));
                }
            }
        }

        let file_name = source
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.to_string_lossy().into_owned());

        match source
            .parent()
            .and_then(|p| p.file_name())
            .map(|s| s.to_string_lossy().into_owned())
        {
            Some(channel) if !channel.is_empty() => Self(format!("{}/{}", channel, file_name)),
            _ => Self(file_name),
        }
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Absolute form of `path`, with the longest existing prefix resolved
/// through the filesystem so symlinked spellings compare equal.
pub fn absolute_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = std::fs::canonicalize(existing) {
            return rest.iter().rev().fold(canonical, |dir, name| dir.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute,
        }
    }
}

impl fmt::Display for VodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VodId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
