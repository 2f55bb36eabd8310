//! HTTP handlers.
//!
//! Every proxied response, errors included, carries
//! `Access-Control-Allow-Origin: *` so browser clients can call the proxy
//! directly.

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::AppState;
use crate::cache::{EntryValue, parse_ids};
use crate::fetch::{FetchOutcome, RequestOptions};
use crate::{ProxyError, Result, upstream};

/// Build the router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/thumbnails", get(thumbnails))
        .route("/thumbnail", get(thumbnail))
        .route("/asset", get(asset))
        .route("/audio", get(audio))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct IdsQuery {
    ids: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdQuery {
    id: Option<String>,
}

/// Body of `/thumbnails`, shaped like the upstream's own response.
#[derive(Debug, Serialize)]
struct BatchResponse {
    data: Vec<EntryValue>,
}

async fn health() -> &'static str {
    "ok"
}

async fn thumbnails(State(state): State<AppState>, Query(query): Query<IdsQuery>) -> Response {
    let Some(raw) = query.ids else {
        return error_response(StatusCode::BAD_REQUEST, "Missing ids param");
    };
    match state.cache.resolve(&parse_ids(&raw)).await {
        Ok(entries) => {
            let data = entries.into_iter().map(|entry| entry.value).collect();
            proxied(StatusCode::OK, Json(BatchResponse { data }))
        }
        Err(e) => failure(e),
    }
}

async fn thumbnail(State(state): State<AppState>, Query(query): Query<IdQuery>) -> Response {
    let id = match required_id(query.id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let url = state.api.thumbnails_url(&[id.as_str()]);
    passthrough(
        state
            .fetcher
            .fetch(&url, &RequestOptions::new(), &state.single_policy)
            .await,
    )
}

async fn asset(State(state): State<AppState>, Query(query): Query<IdQuery>) -> Response {
    let id = match required_id(query.id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let url = state.api.asset_url(&id);
    passthrough(
        state
            .fetcher
            .fetch(&url, &state.asset_options, &state.asset_policy)
            .await,
    )
}

/// Redirect to the media location the asset-delivery API reports.
async fn audio(State(state): State<AppState>, Query(query): Query<IdQuery>) -> Response {
    let id = match required_id(query.id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let url = state.api.asset_url(&id);
    let outcome = match state
        .fetcher
        .fetch(&url, &state.asset_options, &state.asset_policy)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return failure(e),
    };
    match location(&outcome) {
        Some(location) => (
            StatusCode::FOUND,
            [
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                (header::LOCATION, location),
            ],
        )
            .into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Audio location not found"),
    }
}

fn location(outcome: &FetchOutcome) -> Option<&str> {
    outcome
        .parsed_body
        .as_ref()?
        .get("location")?
        .as_str()
        .filter(|location| !location.is_empty())
}

fn required_id(id: Option<String>) -> std::result::Result<String, Response> {
    let Some(id) = id.map(|id| id.trim().to_string()) else {
        return Err(error_response(StatusCode::BAD_REQUEST, "Missing id param"));
    };
    upstream::validate_id(&id).map_err(failure)?;
    Ok(id)
}

/// Relay the upstream status and body; JSON when it parses, text otherwise.
fn passthrough(result: Result<FetchOutcome>) -> Response {
    match result {
        Ok(outcome) => {
            let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::BAD_GATEWAY);
            match outcome.parsed_body {
                Some(body) => proxied(status, Json(body)),
                None => proxied(status, outcome.raw_body),
            }
        }
        Err(e) => failure(e),
    }
}

fn failure(e: ProxyError) -> Response {
    let status = match &e {
        ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ProxyError::Network(_) | ProxyError::Read(_) => StatusCode::BAD_GATEWAY,
        ProxyError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        ProxyError::Configuration(_) | ProxyError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        error!(error = %e, "request failed");
    }
    error_response(status, &e.to_string())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    proxied(status, Json(json!({ "error": message })))
}

fn proxied(status: StatusCode, body: impl IntoResponse) -> Response {
    (
        status,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::cache::{CacheConfig, LookupCache};
    use crate::fetch::{BackoffConfig, RawResponse, ResilientFetcher, RetryPolicy, Transport};
    use crate::upstream::UpstreamApi;

    /// Transport answering every GET with the same canned response.
    struct StubTransport {
        response: Option<RawResponse>,
        calls: AtomicU32,
        last_url: Mutex<Option<String>>,
        last_cookie: Mutex<Option<String>>,
    }

    impl StubTransport {
        fn new(status: u16, body: &str) -> Self {
            Self {
                response: Some(RawResponse {
                    status,
                    body: body.as_bytes().to_vec(),
                }),
                calls: AtomicU32::new(0),
                last_url: Mutex::new(None),
                last_cookie: Mutex::new(None),
            }
        }

        fn unreachable() -> Self {
            Self {
                response: None,
                ..Self::new(0, "")
            }
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        fn name(&self) -> &str {
            "stub"
        }

        async fn get(&self, url: &str, options: &RequestOptions) -> Result<RawResponse> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            *self.last_url.lock().unwrap() = Some(url.to_string());
            *self.last_cookie.lock().unwrap() = options
                .headers
                .get("cookie")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.response
                .clone()
                .ok_or_else(|| ProxyError::Network("connection refused".into()))
        }
    }

    fn app(transport: Arc<StubTransport>) -> Router {
        let fetcher = Arc::new(
            ResilientFetcher::new(transport).backoff(BackoffConfig::immediate()),
        );
        let api = UpstreamApi::new().thumbnail_base("http://upstream/v1/assets");
        let cache = LookupCache::new(
            Arc::clone(&fetcher),
            api.clone(),
            CacheConfig::default().policy(RetryPolicy::disabled("test_batch")),
        );
        let mut state = AppState::new(fetcher, cache, api);
        state.single_policy = RetryPolicy::disabled("test_single");
        state.asset_policy = RetryPolicy::disabled("test_asset");
        state.asset_options = RequestOptions::new().header("Cookie", "session=abc").unwrap();
        router(state)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let cors = response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, cors, body.to_vec())
    }

    fn json_body(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn thumbnails_are_deduplicated_and_ordered() {
        let transport = Arc::new(StubTransport::new(
            200,
            r#"{"data":[{"targetId":1,"state":"Completed","imageUrl":"https://cdn/1.png"}]}"#,
        ));
        let (status, cors, body) = get(app(transport.clone()), "/thumbnails?ids=1,2,1").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(cors.as_deref(), Some("*"));
        let body = json_body(&body);
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["imageUrl"], "https://cdn/1.png");
        assert_eq!(data[1]["targetId"], "2");
        assert_eq!(data[1]["state"], "Error");
        assert_eq!(
            transport.last_url.lock().unwrap().as_deref(),
            Some("http://upstream/v1/assets?assetIds=1,2&size=420x420&format=Png")
        );
    }

    #[tokio::test]
    async fn thumbnails_without_ids_is_bad_request() {
        let transport = Arc::new(StubTransport::new(200, "{}"));
        let (status, cors, body) = get(app(transport.clone()), "/thumbnails").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(cors.as_deref(), Some("*"));
        assert_eq!(json_body(&body)["error"], "Missing ids param");

        let (status, _, _) = get(app(transport.clone()), "/thumbnails?ids=,,").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(transport.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn thumbnails_upstream_failure_is_bad_gateway() {
        let transport = Arc::new(StubTransport::unreachable());
        let (status, _, body) = get(app(transport), "/thumbnails?ids=1").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(
            json_body(&body)["error"]
                .as_str()
                .unwrap()
                .contains("connection refused")
        );
    }

    #[tokio::test]
    async fn thumbnail_passes_upstream_status_through() {
        let transport = Arc::new(StubTransport::new(
            400,
            r#"{"errors":[{"code":1,"message":"invalid asset id"}]}"#,
        ));
        let (status, _, body) = get(app(transport), "/thumbnail?id=5").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&body)["errors"][0]["message"], "invalid asset id");
    }

    #[tokio::test]
    async fn thumbnail_relays_non_json_bodies_as_text() {
        let transport = Arc::new(StubTransport::new(502, "<html>bad gateway</html>"));
        let (status, _, body) = get(app(transport), "/thumbnail?id=5").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, b"<html>bad gateway</html>");
    }

    #[tokio::test]
    async fn thumbnail_rejects_malformed_id() {
        let transport = Arc::new(StubTransport::new(200, "{}"));
        let (status, _, _) = get(app(transport.clone()), "/thumbnail?id=1%26x%3D2").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, body) = get(app(transport.clone()), "/thumbnail").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&body)["error"], "Missing id param");
        assert_eq!(transport.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn asset_sends_configured_headers() {
        let transport = Arc::new(StubTransport::new(
            200,
            r#"{"location":"https://cdn/audio/77"}"#,
        ));
        let (status, _, body) = get(app(transport.clone()), "/asset?id=77").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["location"], "https://cdn/audio/77");
        assert_eq!(
            transport.last_cookie.lock().unwrap().as_deref(),
            Some("session=abc")
        );
        assert!(
            transport
                .last_url
                .lock()
                .unwrap()
                .as_deref()
                .unwrap()
                .ends_with("/77")
        );
    }

    #[tokio::test]
    async fn audio_redirects_to_location() {
        let transport = Arc::new(StubTransport::new(
            200,
            r#"{"location":"https://cdn/audio/77"}"#,
        ));
        let response = app(transport)
            .oneshot(Request::builder().uri("/audio?id=77").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://cdn/audio/77"
        );
    }

    #[tokio::test]
    async fn audio_without_location_is_not_found() {
        let transport = Arc::new(StubTransport::new(
            200,
            r#"{"errors":[{"code":0,"message":"Authentication required"}]}"#,
        ));
        let (status, cors, body) = get(app(transport), "/audio?id=77").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(cors.as_deref(), Some("*"));
        assert_eq!(json_body(&body)["error"], "Audio location not found");
    }

    #[tokio::test]
    async fn health_is_ok() {
        let transport = Arc::new(StubTransport::new(200, "{}"));
        let (status, _, body) = get(app(transport), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }
}
