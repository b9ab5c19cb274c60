//! Directory listing nodes and the canonical listing order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Entry of a remote directory listing.
///
/// Only the fields the caches need are modelled; parsers may carry more
/// information alongside.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileNode {
    /// File or directory name (last path segment).
    pub name: String,
    /// Path relative to the repository root.
    pub path: String,
    /// Whether the node is a directory.
    pub is_directory: bool,
    /// Size in bytes when the listing reports one.
    #[serde(default)]
    pub size: Option<u64>,
}

impl FileNode {
    /// Create a file node.
    pub fn file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_directory: false,
            size: None,
        }
    }

    /// Create a directory node.
    pub fn directory(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_directory: true,
            size: None,
        }
    }

    /// Approximate in-memory footprint, used as the cost of cached listings.
    #[must_use]
    pub fn estimated_bytes(&self) -> usize {
        64 + self.name.len() + self.path.len()
    }
}

/// Canonical listing order: directories first, then case-insensitive name.
///
/// Names differing only in case are ordered by their exact bytes so the
/// order is total.
#[must_use]
pub fn listing_order(a: &FileNode, b: &FileNode) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| {
            a.name
                .chars()
                .flat_map(char::to_lowercase)
                .cmp(b.name.chars().flat_map(char::to_lowercase))
        })
        .then_with(|| a.name.cmp(&b.name))
}

/// Sort `nodes` into canonical listing order.
pub fn sort_listing(nodes: &mut [FileNode]) {
    nodes.sort_by(listing_order);
}

/// Whether `nodes` already is in canonical listing order.
#[must_use]
pub fn is_canonical(nodes: &[FileNode]) -> bool {
    nodes
        .windows(2)
        .all(|pair| listing_order(&pair[0], &pair[1]) != Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(nodes: &[FileNode]) -> Vec<&str> {
        nodes.iter().map(|node| node.name.as_str()).collect()
    }

    #[test]
    fn directories_come_first_then_case_insensitive_names() {
        let mut nodes = vec![
            FileNode::file("b", "src/b"),
            FileNode::directory("A", "src/A"),
            FileNode::file("a", "src/a"),
            FileNode::directory("lib", "src/lib"),
            FileNode::file("C", "src/C"),
        ];
        sort_listing(&mut nodes);
        assert_eq!(names(&nodes), vec!["A", "lib", "a", "b", "C"]);
        assert!(is_canonical(&nodes));
    }

    #[test]
    fn case_only_differences_are_ordered_deterministically() {
        let mut left = vec![FileNode::file("readme", "readme"), FileNode::file("README", "README")];
        let mut right = left.clone();
        right.reverse();
        sort_listing(&mut left);
        sort_listing(&mut right);
        assert_eq!(left, right);
    }

    fn node_strategy() -> impl Strategy<Value = FileNode> {
        ("[a-zA-Z0-9_.]{1,8}", any::<bool>()).prop_map(|(name, is_directory)| FileNode {
            path: format!("dir/{name}"),
            name,
            is_directory,
            size: None,
        })
    }

    proptest! {
        #[test]
        fn sorting_is_canonical_regardless_of_input_order(
            nodes in prop::collection::vec(node_strategy(), 0..24)
        ) {
            let mut forward = nodes.clone();
            let mut backward = nodes;
            backward.reverse();
            sort_listing(&mut forward);
            sort_listing(&mut backward);

            prop_assert!(is_canonical(&forward));
            prop_assert_eq!(&forward, &backward);
            let first_file = forward.iter().position(|node| !node.is_directory).unwrap_or(forward.len());
            prop_assert!(forward[first_file..].iter().all(|node| !node.is_directory));
        }
    }
}
