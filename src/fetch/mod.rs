//! Resilient upstream fetching.
//!
//! [`ResilientFetcher`] wraps a [`Transport`] with retry, backoff, and
//! rate-limit handling:
//!
//! - network and body-read failures are retried, then propagated;
//! - rate-limited responses (see [`classify`]) are retried with a larger
//!   backoff, then returned as a best-effort [`FetchOutcome`];
//! - everything else, including ordinary 4xx/5xx, returns at once.
//!
//! A [`RetryPolicy`] deadline bounds the whole call.

pub mod classify;
mod fetcher;
pub mod retry;
pub mod transport;

pub use classify::{HeuristicClassifier, RateLimitClassifier};
pub use fetcher::{FetchOutcome, ResilientFetcher};
pub use retry::{BackoffConfig, BackoffKind, RetryPolicy};
pub use transport::{HttpTransport, RawResponse, RequestOptions, Transport};
