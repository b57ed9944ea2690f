use std::fmt;

use anyhow::{Context, Result};

/// Key used to index per-operation breaker and backoff state.
///
/// The granularity is chosen by the caller: one key per endpoint
/// (`"form_submit:/expenses/add"`) or one per class of work
/// (`"geocode_fallback"`). Failures under one key never affect another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct OperationKey(String);

impl OperationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a key from an HTTP method and URL: `"<METHOD>:<path>"`.
    ///
    /// Query strings and fragments are dropped so that the same form posted
    /// with different parameters shares one circuit.
    pub fn from_endpoint(method: &str, url: &str) -> Result<Self> {
        let parsed =
            url::Url::parse(url).with_context(|| format!("invalid URL for operation key: {url}"))?;
        Ok(Self(format!(
            "{}:{}",
            method.trim().to_ascii_uppercase(),
            parsed.path()
        )))
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OperationKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}
