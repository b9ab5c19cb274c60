//! Helpers for repository-relative paths. The repository root is the empty
//! path.

/// Strip leading and trailing `/` separators.
#[must_use]
pub fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}

/// Parent of a normalized path, or `None` for the repository root.
#[must_use]
pub fn parent_path(path: &str) -> Option<&str> {
    let path = normalize_path(path);
    if path.is_empty() {
        return None;
    }
    Some(path.rfind('/').map_or("", |idx| &path[..idx]))
}
