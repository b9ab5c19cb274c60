//! Resource keys: the normalized identifiers every cache tier is keyed by.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized identifier of a cacheable item.
///
/// Derived deterministically from a source identifier: surrounding
/// whitespace and any `#fragment` are dropped and the scheme and host of a
/// `scheme://host/...` identifier are lowercased. Path and query are kept
/// verbatim because remote paths are case sensitive.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Normalize `identifier` into a key.
    #[must_use]
    pub fn new(identifier: &str) -> Self {
        let trimmed = identifier.trim();
        let without_fragment = trimmed.split_once('#').map_or(trimmed, |(head, _)| head);

        let normalized = match without_fragment.split_once("://") {
            Some((scheme, rest)) => {
                let split = rest.find(['/', '?']).unwrap_or(rest.len());
                let (host, tail) = rest.split_at(split);
                format!(
                    "{}://{}{}",
                    scheme.to_ascii_lowercase(),
                    host.to_ascii_lowercase(),
                    tail
                )
            }
            None => without_fragment.to_owned(),
        };
        Self(normalized)
    }

    /// Borrow the normalized key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host_only() {
        let key = ResourceKey::new("  HTTPS://Git.Example.ORG/Repo.git/tree/?path=Src#L10 ");
        assert_eq!(key.as_str(), "https://git.example.org/Repo.git/tree/?path=Src");
    }

    #[test]
    fn host_followed_by_query_is_normalized() {
        let key = ResourceKey::new("http://HOST?p=1");
        assert_eq!(key.as_str(), "http://host?p=1");
    }

    #[test]
    fn plain_keys_are_kept() {
        assert_eq!(ResourceKey::new("directory:repo:src").as_str(), "directory:repo:src");
    }

    #[test]
    fn equivalent_identifiers_share_a_key() {
        assert_eq!(
            ResourceKey::from("https://HOST/a#top"),
            ResourceKey::from("https://host/a".to_owned())
        );
    }
}
