//! Path helpers for the emulated directory tree.
//!
//! Every resource is identified by a normalized absolute path such as
//! `/alice/photos/cat.jpg`. The parent of a resource is the path up to the
//! last `/` (or `/` itself for top-level entries), and the object key used
//! by the object store is the path without its leading `/`.

use crate::{CairnError, Result};

/// The root of the tree.
pub const ROOT_PATH: &str = "/";

/// A single element of a split path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathElement {
    /// Path of the containing directory.
    pub parent: String,
    /// Full path of this element.
    pub path: String,
    /// URL-decoded display name of this element.
    pub name: String,
}

/// Check that a path is absolute and normalized.
///
/// A valid path starts with `/`, has no empty segments and carries no
/// trailing `/` unless it is the root itself.
pub fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(CairnError::InvalidArgument(format!(
            "resource path must start with '/': {path}"
        )));
    }
    if path == ROOT_PATH {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(CairnError::InvalidArgument(format!(
            "resource path must not end with '/': {path}"
        )));
    }
    if path.contains("//") {
        return Err(CairnError::InvalidArgument(format!(
            "resource path contains an empty segment: {path}"
        )));
    }
    if path.contains('\0') {
        return Err(CairnError::InvalidArgument(
            "resource path contains a NUL byte".to_string(),
        ));
    }
    Ok(())
}

/// Get the parent directory path of a normalized path.
///
/// The root is its own parent.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT_PATH,
        Some(idx) => &path[..idx],
    }
}

/// Get the last segment of a normalized path.
pub fn name_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Get the object store key for a path (the path without its leading `/`).
pub fn object_key(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Get the prefix shared by the paths of every descendant of `path`.
pub fn child_prefix(path: &str) -> String {
    if path == ROOT_PATH {
        ROOT_PATH.to_string()
    } else {
        format!("{path}/")
    }
}

/// Get the prefix shared by the object keys of every descendant of `path`.
pub fn child_key_prefix(path: &str) -> String {
    let key = object_key(path);
    if key.is_empty() {
        String::new()
    } else {
        format!("{key}/")
    }
}

/// Normalize a user-relative path into an absolute path under the user's home.
///
/// `""` and `"/"` map to the home directory itself; a trailing `/` is dropped.
pub fn normalize_path(owner: &str, path: &str) -> String {
    if path.is_empty() || path == ROOT_PATH {
        format!("/{owner}")
    } else if let Some(trimmed) = path.strip_suffix('/') {
        format!("/{owner}/{}", trimmed.trim_start_matches('/'))
    } else {
        format!("/{owner}/{}", path.trim_start_matches('/'))
    }
}

/// Split a normalized path into one element per segment, each carrying its parent.
///
/// `/x/y` yields `[("/", "/x", "x"), ("/x", "/x/y", "y")]`.
pub fn split_path_elements(path: &str) -> Vec<PathElement> {
    let mut elements = Vec::new();
    let mut current = String::new();

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let parent = if current.is_empty() {
            ROOT_PATH.to_string()
        } else {
            current.clone()
        };
        current.push('/');
        current.push_str(segment);

        let name = urlencoding::decode(segment)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| segment.to_string());

        elements.push(PathElement {
            parent,
            path: current.clone(),
            name,
        });
    }

    elements
}
