//! Lookup cache.
//!
//! [`LookupCache`] sits between clients and the upstream thumbnail API:
//!
//! 1. requested identifiers are deduplicated, keeping first-occurrence order;
//! 2. fresh entries (see [`is_fresh`]) are served from memory;
//! 3. misses already being fetched by another caller attach to that
//!    caller's in-flight batch;
//! 4. the remaining misses go upstream in one batched request;
//! 5. every missed identifier is cached, as the upstream item or as an
//!    [`ErrorPlaceholder`] when the upstream left it out.
//!
//! # Expiry
//!
//! Expiry is lazy. An entry is served while `now < expires_at` and treated
//! as a miss afterwards; there is no sweeper. The store is capacity-bounded
//! (moka), which is the only way entries are removed.
//!
//! Placeholders written while the upstream was rate limiting (or answering
//! with an error status) expire after
//! [`CacheConfig::transient_ttl`], so a temporary overload does not hide an
//! identifier for the full TTL.
//!
//! # Failure
//!
//! If the upstream batch fails outright (network/read errors after retries,
//! or the deadline), `resolve` fails for every caller waiting on that batch
//! and nothing from it is cached.
//!
//! Each batch runs as its own task. A caller that gives up (timeout, dropped
//! request) does not stop it; the batch still caches its result and clears
//! its in-flight markers for later callers.

mod entry;
mod lookup;

pub use entry::{
    CacheEntry, EntryValue, ErrorPlaceholder, PlaceholderReason, PlaceholderState, is_fresh,
};
pub use lookup::{CacheConfig, LookupCache, parse_ids};
