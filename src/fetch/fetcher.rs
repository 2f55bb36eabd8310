//! The retrying fetch loop.
//!
//! Each attempt is reduced to an [`Attempt`], and [`next_step`] decides,
//! without side effects, whether to return or back off. The loop in
//! [`ResilientFetcher::fetch`] only sleeps and counts.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::classify::{HeuristicClassifier, RateLimitClassifier};
use super::retry::{BackoffConfig, BackoffKind, RetryPolicy};
use super::transport::{RequestOptions, Transport};
use crate::telemetry;
use crate::{ProxyError, Result};

/// Result of one logical upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// HTTP status of the last attempt.
    pub status: u16,
    /// Body of the last attempt, lossily decoded as UTF-8.
    pub raw_body: String,
    /// Body parsed as JSON, or `None` when it is not well-formed.
    pub parsed_body: Option<Value>,
    /// Whether `status` is 2xx.
    pub ok: bool,
    /// Attempts made, including the first.
    pub attempts: u32,
    /// The upstream was still rate limiting when retries ran out.
    pub rate_limited: bool,
}

impl FetchOutcome {
    /// A 2xx response that was not a rate-limit signal.
    pub fn is_success(&self) -> bool {
        self.ok && !self.rate_limited
    }
}

/// What a single attempt produced.
#[derive(Debug)]
pub(crate) enum Attempt {
    Complete(FetchOutcome),
    RateLimited(FetchOutcome),
    Failed(ProxyError),
}

/// What the loop does next.
#[derive(Debug)]
pub(crate) enum Step {
    Return(Result<FetchOutcome>),
    Backoff(BackoffKind),
}

/// Decide the next step after attempt number `attempt` (1-indexed).
pub(crate) fn next_step(attempt: u32, policy: &RetryPolicy, result: Attempt) -> Step {
    let exhausted = attempt > policy.max_retries;
    match result {
        Attempt::Complete(outcome) => Step::Return(Ok(outcome)),
        // Best effort: hand back whatever the upstream said last.
        Attempt::RateLimited(outcome) if exhausted => Step::Return(Ok(outcome)),
        Attempt::RateLimited(_) => Step::Backoff(BackoffKind::RateLimited),
        Attempt::Failed(e) if exhausted || !e.is_retryable() => Step::Return(Err(e)),
        Attempt::Failed(_) => Step::Backoff(BackoffKind::Failure),
    }
}

/// Issues upstream GETs, retrying network failures, read failures, and
/// rate limiting with exponential backoff and jitter.
///
/// Ordinary HTTP error statuses are returned, not retried. Exhausted
/// rate limiting is returned as a best-effort [`FetchOutcome`] with
/// `rate_limited` set; exhausted network/read failures are errors.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use thumbproxy::{HttpTransport, RequestOptions, ResilientFetcher, RetryPolicy};
/// # async fn run() -> thumbproxy::Result<()> {
/// let transport = HttpTransport::new(std::time::Duration::from_secs(10))?;
/// let fetcher = ResilientFetcher::new(Arc::new(transport));
/// let outcome = fetcher
///     .fetch("https://example.com/v1/assets?assetIds=1", &RequestOptions::new(), &RetryPolicy::single())
///     .await?;
/// println!("{} after {} attempts", outcome.status, outcome.attempts);
/// # Ok(())
/// # }
/// ```
pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    classifier: Arc<dyn RateLimitClassifier>,
    backoff: BackoffConfig,
}

impl ResilientFetcher {
    /// Create a fetcher with the heuristic classifier and default backoff.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            classifier: Arc::new(HeuristicClassifier),
            backoff: BackoffConfig::default(),
        }
    }

    /// Replace the rate-limit classifier.
    pub fn classifier(mut self, classifier: Arc<dyn RateLimitClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the backoff configuration.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Perform one logical GET under `policy`.
    pub async fn fetch(
        &self,
        url: &str,
        options: &RequestOptions,
        policy: &RetryPolicy,
    ) -> Result<FetchOutcome> {
        let Some(deadline) = policy.deadline else {
            return self.run(url, options, policy).await;
        };
        match tokio::time::timeout(deadline, self.run(url, options, policy)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    policy = %policy.name,
                    url,
                    deadline_ms = deadline.as_millis() as u64,
                    "upstream call exceeded deadline"
                );
                Err(ProxyError::DeadlineExceeded(deadline))
            }
        }
    }

    async fn run(
        &self,
        url: &str,
        options: &RequestOptions,
        policy: &RetryPolicy,
    ) -> Result<FetchOutcome> {
        let mut attempt = 1;
        loop {
            let result = self.attempt(url, options, policy, attempt).await;
            match next_step(attempt, policy, result) {
                Step::Return(result) => return result,
                Step::Backoff(kind) => {
                    let delay = self.backoff.effective_delay(kind, attempt);
                    metrics::counter!(telemetry::UPSTREAM_RETRIES_TOTAL,
                        "policy" => policy.name.clone(),
                    )
                    .increment(1);
                    warn!(
                        policy = %policy.name,
                        url,
                        attempt,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        reason = ?kind,
                        "retrying upstream call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        options: &RequestOptions,
        policy: &RetryPolicy,
        attempt: u32,
    ) -> Attempt {
        let started = Instant::now();
        let response = match self.transport.get(url, options).await {
            Ok(response) => response,
            Err(e) => {
                let class = error_class(&e);
                record_attempt(policy, class);
                warn!(
                    policy = %policy.name,
                    transport = self.transport.name(),
                    method = "GET",
                    url,
                    attempt,
                    error_class = class,
                    error = %e,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "upstream attempt failed"
                );
                return Attempt::Failed(e);
            }
        };

        let parsed_body = serde_json::from_slice::<Value>(&response.body).ok();
        let rate_limited = self
            .classifier
            .is_rate_limited(response.status, parsed_body.as_ref());

        debug!(
            policy = %policy.name,
            transport = self.transport.name(),
            method = "GET",
            url,
            attempt,
            status = response.status,
            rate_limited,
            duration_ms = started.elapsed().as_millis() as u64,
            bytes = response.body.len(),
            "upstream attempt completed"
        );

        let outcome = FetchOutcome {
            status: response.status,
            raw_body: String::from_utf8_lossy(&response.body).into_owned(),
            parsed_body,
            ok: (200..300).contains(&response.status),
            attempts: attempt,
            rate_limited,
        };

        if rate_limited {
            record_attempt(policy, "rate_limited");
            metrics::counter!(telemetry::UPSTREAM_RATE_LIMITED_TOTAL,
                "policy" => policy.name.clone(),
            )
            .increment(1);
            Attempt::RateLimited(outcome)
        } else {
            record_attempt(policy, "ok");
            Attempt::Complete(outcome)
        }
    }
}

fn record_attempt(policy: &RetryPolicy, outcome: &'static str) {
    metrics::counter!(telemetry::UPSTREAM_ATTEMPTS_TOTAL,
        "policy" => policy.name.clone(),
        "outcome" => outcome,
    )
    .increment(1);
}

fn error_class(error: &ProxyError) -> &'static str {
    match error {
        ProxyError::Network(_) => "network",
        ProxyError::Read(_) => "read",
        _ => "other",
    }
}
