//! Cache entry types and the freshness rule.

use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

/// Why an identifier could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderReason {
    /// A clean upstream response did not include the identifier.
    NotFound,
    /// The upstream was rate limiting or answered with an error status,
    /// so the omission may be temporary.
    Overloaded,
}

impl PlaceholderReason {
    /// Message exposed to clients.
    pub fn message(self) -> &'static str {
        match self {
            PlaceholderReason::NotFound => "Not found or rate-limited",
            PlaceholderReason::Overloaded => "Upstream overloaded, try again later",
        }
    }

    /// Metric label.
    pub fn label(self) -> &'static str {
        match self {
            PlaceholderReason::NotFound => "not_found",
            PlaceholderReason::Overloaded => "overloaded",
        }
    }
}

/// Serialized `state` of a placeholder; always `"Error"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaceholderState {
    Error,
}

/// Stand-in for an identifier the upstream did not resolve.
///
/// Serializes in the same shape as upstream items:
/// `{"targetId": "2", "state": "Error", "message": ".."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPlaceholder {
    #[serde(rename = "targetId")]
    pub id: String,
    pub state: PlaceholderState,
    pub message: String,
    #[serde(skip)]
    pub reason: PlaceholderReason,
}

impl ErrorPlaceholder {
    pub fn new(id: impl Into<String>, reason: PlaceholderReason) -> Self {
        Self {
            id: id.into(),
            state: PlaceholderState::Error,
            message: reason.message().to_string(),
            reason,
        }
    }
}

/// A resolved upstream item or a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntryValue {
    /// Upstream item, passed through unmodified.
    Resolved(Value),
    Placeholder(ErrorPlaceholder),
}

impl EntryValue {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, EntryValue::Placeholder(_))
    }

    /// The upstream item, if resolved.
    pub fn as_resolved(&self) -> Option<&Value> {
        match self {
            EntryValue::Resolved(value) => Some(value),
            EntryValue::Placeholder(_) => None,
        }
    }

    /// The placeholder, if unresolved.
    pub fn as_placeholder(&self) -> Option<&ErrorPlaceholder> {
        match self {
            EntryValue::Placeholder(placeholder) => Some(placeholder),
            EntryValue::Resolved(_) => None,
        }
    }
}

/// One cached identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub id: String,
    pub value: EntryValue,
    /// The entry counts as absent from this instant on.
    pub expires_at: Instant,
}

/// Whether `entry` may still be served at `now`.
///
/// Expiry is lazy: stale entries stay in the store until overwritten or
/// evicted for capacity, and are simply treated as misses.
pub fn is_fresh(entry: &CacheEntry, now: Instant) -> bool {
    now < entry.expires_at
}
