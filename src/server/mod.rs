//! HTTP service mode.
//!
//! This module provides:
//! - Configuration and secrets loading (`config`)
//! - The axum router and handlers (`routes`)
//! - [`AppState`], which wires the core together from configuration
//!
//! Routes:
//!
//! | route                    | behaviour                                      |
//! |--------------------------|------------------------------------------------|
//! | `GET /thumbnails?ids=`   | batched, cached lookup via [`LookupCache`]     |
//! | `GET /thumbnail?id=`     | single lookup, upstream response passed through|
//! | `GET /asset?id=`         | asset-delivery call with configured headers    |
//! | `GET /audio?id=`         | 302 to the asset's delivery `location`         |
//! | `GET /health`            | liveness                                       |

pub mod config;
pub mod routes;

use std::sync::Arc;

use crate::cache::LookupCache;
use crate::fetch::{HttpTransport, RequestOptions, ResilientFetcher, RetryPolicy};
use crate::upstream::UpstreamApi;
use crate::Result;

pub use config::{Config, Secrets};
pub use routes::router;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: LookupCache,
    pub fetcher: Arc<ResilientFetcher>,
    pub api: UpstreamApi,
    pub single_policy: RetryPolicy,
    pub asset_policy: RetryPolicy,
    pub asset_options: RequestOptions,
}

impl AppState {
    /// Build the state from a fetcher and API templates with default policies.
    pub fn new(fetcher: Arc<ResilientFetcher>, cache: LookupCache, api: UpstreamApi) -> Self {
        Self {
            cache,
            fetcher,
            api,
            single_policy: RetryPolicy::single(),
            asset_policy: RetryPolicy::new("asset"),
            asset_options: RequestOptions::new(),
        }
    }

    /// Build the reqwest-backed state described by `config` and `secrets`.
    pub fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let transport = HttpTransport::new(config.upstream.timeout())?;
        let fetcher = Arc::new(ResilientFetcher::new(Arc::new(transport)));
        let api = config.upstream.api();
        let cache = LookupCache::new(
            Arc::clone(&fetcher),
            api.clone(),
            config
                .cache
                .cache_config()
                .policy(config.retry.batch_policy()),
        );

        Ok(Self {
            cache,
            fetcher,
            api,
            single_policy: config.retry.single_policy(),
            asset_policy: config.retry.asset_policy(),
            asset_options: secrets.asset_options()?,
        })
    }
}
