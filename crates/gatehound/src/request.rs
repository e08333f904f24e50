//! The request abstraction consumed by the token locator.
//!
//! The gate only ever needs two things from a request: a named header and a
//! nested parameter lookup. [`TokenSource`] captures exactly that seam so the
//! core stays framework-agnostic; `gatehound-axum` implements it over real
//! HTTP requests, and [`StaticRequest`] implements it over in-memory maps for
//! tests and non-HTTP hosts.

use std::collections::HashMap;

/// Read-only view of a request, sufficient for token location.
pub trait TokenSource {
    /// Value of the named header, if present. Header-name matching is
    /// case-insensitive, as in HTTP.
    fn header(&self, name: &str) -> Option<String>;

    /// String value at the given parameter path, if present.
    ///
    /// The path is a sequence of nested keys: `["jwt", "token"]` addresses
    /// `params["jwt"]["token"]`. A missing segment, or a leaf that is not a
    /// string, yields `None`.
    fn param(&self, path: &[String]) -> Option<String>;
}

/// In-memory [`TokenSource`] over a header map and a JSON parameter tree.
#[derive(Debug, Default, Clone)]
pub struct StaticRequest {
    headers: HashMap<String, String>,
    params: serde_json::Value,
}

impl StaticRequest {
    /// An empty request: no headers, no parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replace the parameter tree.
    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

impl TokenSource for StaticRequest {
    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    fn param(&self, path: &[String]) -> Option<String> {
        let mut node = &self.params;
        for key in path {
            node = node.get(key)?;
        }
        node.as_str().map(ToString::to_string)
    }
}
