use std::collections::BTreeMap;

use serde_json::Value;

/// A location to resolve routes against.
///
/// Produced by an external history adapter (browser, hash or memory based)
/// and consumed by [`Router::navigate`](crate::Router::navigate). The engine
/// never parses full URLs itself.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Location {
    /// The pathname, starting with `/`.
    pub pathname: String,
    /// Decoded search parameters.
    pub search_params: BTreeMap<String, String>,
    /// The fragment, without the leading `#`. Empty when absent.
    pub hash: String,
    /// Opaque history state attached to this entry.
    pub state: Option<Value>,
}

impl Location {
    /// Create a location for a plain pathname.
    pub fn new(pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            ..Default::default()
        }
    }

    /// Add a search parameter.
    pub fn with_search_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_params.insert(name.into(), value.into());
        self
    }

    /// Set the fragment.
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = hash.into();
        self
    }
}

impl From<&str> for Location {
    fn from(pathname: &str) -> Self {
        Self::new(pathname)
    }
}
