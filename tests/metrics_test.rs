//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use thumbproxy::fetch::RawResponse;
use thumbproxy::telemetry;
use thumbproxy::{
    BackoffConfig, CacheConfig, LookupCache, RequestOptions, ResilientFetcher, Result,
    RetryPolicy, Transport, UpstreamApi,
};

// ============================================================================
// Mock transport
// ============================================================================

/// Answers 429 for the first `rate_limited` calls, then an empty batch.
struct EventuallyOk {
    rate_limited: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Transport for EventuallyOk {
    fn name(&self) -> &str {
        "eventually-ok"
    }

    async fn get(&self, _url: &str, _options: &RequestOptions) -> Result<RawResponse> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        let status = if call < self.rate_limited { 429 } else { 200 };
        Ok(RawResponse {
            status,
            body: br#"{"data":[]}"#.to_vec(),
        })
    }
}

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    counter_with_label(snapshot, name, None)
}

/// Sum counter values matching a name and, optionally, one label pair.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: Option<(&str, &str)>) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .filter(|(key, _, _, _)| {
            label.is_none_or(|(k, v)| {
                key.key()
                    .labels()
                    .any(|l| l.key() == k && l.value() == v)
            })
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

fn fetcher(rate_limited: u32) -> Arc<ResilientFetcher> {
    let transport = EventuallyOk {
        rate_limited,
        calls: AtomicU32::new(0),
    };
    Arc::new(ResilientFetcher::new(Arc::new(transport)).backoff(BackoffConfig::immediate()))
}

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn retries_record_attempt_and_rate_limit_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                fetcher(2)
                    .fetch("http://upstream/x", &RequestOptions::new(), &RetryPolicy::single())
                    .await
            })
        })
    });
    assert_eq!(result.unwrap().attempts, 3);

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::UPSTREAM_ATTEMPTS_TOTAL), 3);
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::UPSTREAM_ATTEMPTS_TOTAL,
            Some(("outcome", "rate_limited"))
        ),
        2
    );
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::UPSTREAM_RETRIES_TOTAL,
            Some(("policy", "thumbnail"))
        ),
        2
    );
    assert_eq!(counter_total(&snapshot, telemetry::UPSTREAM_RATE_LIMITED_TOTAL), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn cache_records_hits_misses_and_placeholders() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let cache = LookupCache::new(fetcher(0), UpstreamApi::new(), CacheConfig::new());
                cache.resolve(&["1", "2"]).await.unwrap();
                cache.resolve(&["1", "3"]).await.unwrap();
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 3);
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::PLACEHOLDERS_TOTAL,
            Some(("reason", "not_found"))
        ),
        3
    );
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let cache = LookupCache::new(fetcher(0), UpstreamApi::new(), CacheConfig::new());
    cache.resolve(&["1"]).await.unwrap();
}
