//! Telemetry metric name constants.
//!
//! Centralised metric names for thumbproxy operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `thumbproxy_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `policy`: retry policy name of the call site (e.g. "thumbnail_batch")
//! - `outcome`: attempt outcome: "ok", "rate_limited", "network", "read"
//! - `reason`: placeholder reason: "not_found" or "overloaded"

/// Total upstream attempts, including the first one.
///
/// Labels: `policy`, `outcome`.
pub const UPSTREAM_ATTEMPTS_TOTAL: &str = "thumbproxy_upstream_attempts_total";

/// Total retries (attempts after the first).
///
/// Labels: `policy`.
pub const UPSTREAM_RETRIES_TOTAL: &str = "thumbproxy_upstream_retries_total";

/// Total upstream responses classified as rate limited.
///
/// Labels: `policy`.
pub const UPSTREAM_RATE_LIMITED_TOTAL: &str = "thumbproxy_upstream_rate_limited_total";

/// Identifiers served from a fresh cache entry.
pub const CACHE_HITS_TOTAL: &str = "thumbproxy_cache_hits_total";

/// Identifiers that were absent or expired.
pub const CACHE_MISSES_TOTAL: &str = "thumbproxy_cache_misses_total";

/// Missed identifiers that attached to another caller's in-flight batch.
pub const CACHE_COALESCED_TOTAL: &str = "thumbproxy_cache_coalesced_total";

/// Placeholders written into the cache.
///
/// Labels: `reason`.
pub const PLACEHOLDERS_TOTAL: &str = "thumbproxy_placeholders_total";
