//! Thumbproxy - caching, rate-limit-aware proxy for asset thumbnail lookups
//!
//! The upstream thumbnail API is slow, flaky, and rate limits bursty
//! clients. This crate puts two pieces in front of it:
//!
//! - [`ResilientFetcher`] retries network failures, body-read failures, and
//!   rate limiting with exponential backoff and jitter, under an overall
//!   deadline.
//! - [`LookupCache`] deduplicates batch lookups, serves fresh entries from
//!   memory, coalesces concurrent misses, and sends the rest upstream in a
//!   single batched request.
//!
//! With the `server` feature (on by default) the [`server`] module exposes
//! both over HTTP, and the `thumbd` binary runs it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use thumbproxy::{CacheConfig, HttpTransport, LookupCache, ResilientFetcher, UpstreamApi};
//!
//! #[tokio::main]
//! async fn main() -> thumbproxy::Result<()> {
//!     let transport = HttpTransport::new(Duration::from_secs(10))?;
//!     let fetcher = Arc::new(ResilientFetcher::new(Arc::new(transport)));
//!     let cache = LookupCache::new(fetcher, UpstreamApi::default(), CacheConfig::default());
//!
//!     for entry in cache.resolve(&["1818", "2428", "1818"]).await? {
//!         println!("{} placeholder={}", entry.id, entry.value.is_placeholder());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod fetch;
#[cfg(feature = "server")]
pub mod server;
pub mod telemetry;
pub mod upstream;

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheEntry, EntryValue, ErrorPlaceholder, LookupCache, parse_ids};
pub use error::{ProxyError, Result};
pub use fetch::{
    BackoffConfig, FetchOutcome, HeuristicClassifier, HttpTransport, RateLimitClassifier,
    RequestOptions, ResilientFetcher, RetryPolicy, Transport,
};
pub use upstream::UpstreamApi;
