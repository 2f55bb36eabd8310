//! Rate-limit classification.
//!
//! The upstream does not signal overload consistently: sometimes with
//! HTTP 429, sometimes with a 200 or 400 whose JSON body carries a
//! "Too many requests" error. [`HeuristicClassifier`] encodes what has been
//! observed. It is an assumption about the upstream, not a contract; swap in
//! a stricter [`RateLimitClassifier`] once the upstream offers one.

use serde_json::Value;

/// HTTP status that always means "rate limited".
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Case-insensitive substring identifying an overload message.
const OVERLOAD_MARKER: &str = "too many";

/// Error code the upstream pairs with its overload message.
const OVERLOAD_SENTINEL_CODE: i64 = 0;

/// Decides whether an upstream response means "slow down".
pub trait RateLimitClassifier: Send + Sync {
    /// Classify a response from its status and best-effort parsed body.
    fn is_rate_limited(&self, status: u16, body: Option<&Value>) -> bool;
}

/// Status-code plus message-substring heuristic.
///
/// Rate limited when any of the following holds:
/// - the status is 429;
/// - the body has an `errors` list with a `message` containing "too many";
/// - the body itself carries the sentinel `code` 0 and such a `message`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl RateLimitClassifier for HeuristicClassifier {
    fn is_rate_limited(&self, status: u16, body: Option<&Value>) -> bool {
        status == TOO_MANY_REQUESTS || body.is_some_and(body_signals_overload)
    }
}

fn body_signals_overload(body: &Value) -> bool {
    let listed = body
        .get("errors")
        .and_then(Value::as_array)
        .is_some_and(|errors| errors.iter().any(has_overload_message));

    listed
        || (body.get("code").and_then(Value::as_i64) == Some(OVERLOAD_SENTINEL_CODE)
            && has_overload_message(body))
}

fn has_overload_message(error: &Value) -> bool {
    error
        .get("message")
        .and_then(Value::as_str)
        .is_some_and(|message| message.to_lowercase().contains(OVERLOAD_MARKER))
}
