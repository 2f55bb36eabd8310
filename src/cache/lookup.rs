//! Batched, coalescing TTL cache in front of the thumbnail lookup.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, try_join_all};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::entry::{CacheEntry, EntryValue, ErrorPlaceholder, PlaceholderReason, is_fresh};
use crate::fetch::{FetchOutcome, RequestOptions, ResilientFetcher, RetryPolicy};
use crate::upstream::{self, UpstreamApi};
use crate::{ProxyError, Result, telemetry};

/// Configuration for the lookup cache.
///
/// ```rust
/// # use thumbproxy::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .ttl(Duration::from_secs(600))
///     .transient_ttl(Duration::from_secs(30))
///     .max_entries(50_000)
///     .policy(thumbproxy::RetryPolicy::batch().max_retries(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Lifetime of resolved items and not-found placeholders. Default: 30 minutes.
    pub ttl: Duration,
    /// Lifetime of placeholders written while the upstream was overloaded.
    /// Default: 60 seconds.
    pub transient_ttl: Duration,
    /// Maximum number of stored entries. Default: 100,000.
    pub max_entries: u64,
    /// Retry policy of batched upstream calls. Default: [`RetryPolicy::batch`].
    pub policy: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            transient_ttl: Duration::from_secs(60),
            max_entries: 100_000,
            policy: RetryPolicy::batch(),
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live of resolved entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the time-to-live of overload placeholders.
    pub fn transient_ttl(mut self, ttl: Duration) -> Self {
        self.transient_ttl = ttl;
        self
    }

    /// Set the maximum number of stored entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the retry policy of batched upstream calls.
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn ttl_for(&self, reason: Option<PlaceholderReason>) -> Duration {
        match reason {
            Some(PlaceholderReason::Overloaded) => self.transient_ttl,
            _ => self.ttl,
        }
    }
}

type BatchResult = Result<Arc<HashMap<String, CacheEntry>>>;
type SharedBatch = Shared<BoxFuture<'static, BatchResult>>;

/// An upstream batch some identifier is waiting on.
struct InFlight {
    /// Comma-joined identifiers of the batch.
    fingerprint: Arc<str>,
    batch: SharedBatch,
}

struct Inner {
    fetcher: Arc<ResilientFetcher>,
    api: UpstreamApi,
    config: CacheConfig,
    entries: moka::sync::Cache<String, CacheEntry>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

/// TTL cache that batches misses into one upstream call.
///
/// [`resolve`](Self::resolve) serves fresh entries from memory, sends the
/// remaining identifiers to the upstream in a single batched request, and
/// caches both resolved items and placeholders for identifiers the upstream
/// left out. Concurrent callers missing the same identifier share one
/// in-flight batch instead of each calling the upstream.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct LookupCache {
    inner: Arc<Inner>,
}

impl LookupCache {
    /// Create a cache that fetches through `fetcher` under `config.policy`.
    pub fn new(fetcher: Arc<ResilientFetcher>, api: UpstreamApi, config: CacheConfig) -> Self {
        let entries = moka::sync::Cache::builder()
            .max_capacity(config.max_entries)
            .build();
        Self {
            inner: Arc::new(Inner {
                fetcher,
                api,
                config,
                entries,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Fresh entry for `id`, without touching the upstream.
    pub fn get(&self, id: &str) -> Option<CacheEntry> {
        self.inner
            .entries
            .get(id)
            .filter(|entry| is_fresh(entry, Instant::now()))
    }

    /// Number of identifiers currently waiting on an upstream batch.
    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Resolve identifiers, in first-occurrence order, without duplicates.
    ///
    /// Fails with [`ProxyError::InvalidRequest`] when no usable identifier
    /// remains, and with the fetcher's error when a needed upstream batch
    /// fails; nothing from a failed batch is cached.
    pub async fn resolve<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<CacheEntry>> {
        let ids = dedupe(ids)?;
        let now = Instant::now();

        let mut hits = HashMap::new();
        let mut misses = Vec::new();
        for id in &ids {
            match self.inner.entries.get(id.as_str()) {
                Some(entry) if is_fresh(&entry, now) => {
                    hits.insert(id.clone(), entry);
                }
                _ => misses.push(id.clone()),
            }
        }
        metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(hits.len() as u64);
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(misses.len() as u64);
        debug!(
            requested = ids.len(),
            hits = hits.len(),
            misses = misses.len(),
            "resolving identifiers"
        );

        let batches = if misses.is_empty() {
            Vec::new()
        } else {
            try_join_all(self.claim(misses)).await?
        };

        Ok(ids
            .into_iter()
            .map(|id| {
                hits.remove(&id)
                    .or_else(|| batches.iter().find_map(|batch| batch.get(&id).cloned()))
                    // Every batch covers the ids it was registered under, so
                    // this only guards the length invariant.
                    .unwrap_or_else(|| CacheEntry {
                        value: EntryValue::Placeholder(ErrorPlaceholder::new(
                            id.as_str(),
                            PlaceholderReason::Overloaded,
                        )),
                        id,
                        expires_at: now,
                    })
            })
            .collect())
    }

    /// Attach to in-flight batches where possible and start one batch for
    /// the rest. No await happens while the in-flight map is locked.
    ///
    /// The batch runs as its own task, so it finishes, caches, and releases
    /// its in-flight markers even when every waiting caller is dropped.
    fn claim(&self, misses: Vec<String>) -> Vec<SharedBatch> {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut waiting = Vec::new();
        let mut attached = HashSet::new();
        let mut owned = Vec::new();
        for id in misses {
            match in_flight.get(&id) {
                Some(pending) => {
                    metrics::counter!(telemetry::CACHE_COALESCED_TOTAL).increment(1);
                    if attached.insert(Arc::clone(&pending.fingerprint)) {
                        debug!(id = %id, batch = %pending.fingerprint, "attaching to in-flight batch");
                        waiting.push(pending.batch.clone());
                    }
                }
                None => owned.push(id),
            }
        }

        if !owned.is_empty() {
            let fingerprint: Arc<str> = owned.join(",").into();
            let task = tokio::spawn(Inner::fetch_batch(
                Arc::clone(&self.inner),
                owned.clone(),
                Arc::clone(&fingerprint),
            ));
            let batch = Inner::join_batch(
                Arc::clone(&self.inner),
                task,
                owned.clone(),
                Arc::clone(&fingerprint),
            )
            .boxed()
            .shared();
            for id in owned {
                in_flight.insert(
                    id,
                    InFlight {
                        fingerprint: Arc::clone(&fingerprint),
                        batch: batch.clone(),
                    },
                );
            }
            waiting.push(batch);
        }
        waiting
    }
}

impl Inner {
    /// Wait for a batch task. A task that panicked never reached its own
    /// release, so markers are dropped here instead.
    async fn join_batch(
        self: Arc<Self>,
        task: JoinHandle<BatchResult>,
        ids: Vec<String>,
        fingerprint: Arc<str>,
    ) -> BatchResult {
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(batch = %fingerprint, error = %e, "upstream batch task aborted");
                self.release(&ids, &fingerprint);
                Err(ProxyError::Internal(format!("upstream batch task aborted: {e}")))
            }
        }
    }

    async fn fetch_batch(self: Arc<Self>, ids: Vec<String>, fingerprint: Arc<str>) -> BatchResult {
        let url = self.api.thumbnails_url(&ids);
        let result = self
            .fetcher
            .fetch(&url, &RequestOptions::default(), &self.config.policy)
            .await
            .map(|outcome| Arc::new(self.store(&ids, &outcome)));

        if let Err(e) = &result {
            warn!(batch = %fingerprint, error = %e, "upstream batch failed; nothing cached");
        }
        self.release(&ids, &fingerprint);
        result
    }

    /// Cache an entry for every id of the batch, resolved or placeholder.
    fn store(&self, ids: &[String], outcome: &FetchOutcome) -> HashMap<String, CacheEntry> {
        let items = outcome
            .parsed_body
            .as_ref()
            .map(upstream::index_items)
            .unwrap_or_default();
        let omission = if outcome.is_success() {
            PlaceholderReason::NotFound
        } else {
            PlaceholderReason::Overloaded
        };

        let now = Instant::now();
        let mut stored = HashMap::with_capacity(ids.len());
        for id in ids {
            let (value, reason) = match items.get(id) {
                Some(item) => (EntryValue::Resolved((*item).clone()), None),
                None => {
                    metrics::counter!(telemetry::PLACEHOLDERS_TOTAL,
                        "reason" => omission.label(),
                    )
                    .increment(1);
                    (
                        EntryValue::Placeholder(ErrorPlaceholder::new(id.as_str(), omission)),
                        Some(omission),
                    )
                }
            };
            let entry = CacheEntry {
                id: id.clone(),
                value,
                expires_at: now + self.config.ttl_for(reason),
            };
            self.entries.insert(id.clone(), entry.clone());
            stored.insert(id.clone(), entry);
        }

        debug!(
            batch = ids.len(),
            resolved = items.len().min(ids.len()),
            status = outcome.status,
            attempts = outcome.attempts,
            rate_limited = outcome.rate_limited,
            "stored upstream batch"
        );
        stored
    }

    /// Drop in-flight markers that still point at this batch.
    fn release(&self, ids: &[String], fingerprint: &Arc<str>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            if in_flight
                .get(id)
                .is_some_and(|pending| Arc::ptr_eq(&pending.fingerprint, fingerprint))
            {
                in_flight.remove(id);
            }
        }
    }
}

/// Split a comma-separated identifier parameter, trimming and dropping
/// empty tokens. Duplicates are kept; [`LookupCache::resolve`] removes them.
pub fn parse_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn dedupe<S: AsRef<str>>(ids: &[S]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for id in ids {
        let id = id.as_ref().trim();
        if id.is_empty() {
            continue;
        }
        upstream::validate_id(id)?;
        if seen.insert(id) {
            unique.push(id.to_string());
        }
    }
    if unique.is_empty() {
        return Err(ProxyError::InvalidRequest("no identifiers supplied".into()));
    }
    Ok(unique)
}
