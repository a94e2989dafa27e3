//! Request-scoped operation context
//!
//! Carries the request id and a few descriptive attributes down into the
//! coordinator. Callers decide whether to trace: `span()` only builds the
//! span, attaching it is up to them.

use std::collections::BTreeMap;
use tracing::Span;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpContext {
    request_id: String,
    attrs: BTreeMap<&'static str, String>,
}

impl OpContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &'static str, value: impl ToString) -> Self {
        self.attrs.insert(key, value.to_string());
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// A span for `operation` carrying the request id and attributes
    pub fn span(&self, operation: &'static str) -> Span {
        tracing::info_span!(
            "lfs",
            operation,
            request_id = %self.request_id,
            attrs = ?self.attrs,
        )
    }
}
