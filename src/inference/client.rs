//! HTTP client for the model-serving backend.
//!
//! Every call takes a rate-limiter permit, loads the payload, then posts it to
//! `{base_url}/predictions/{model}` under a hard timeout that also bounds the
//! retries of transport failures.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::classifier::classify_with_hint;
use super::payload::PayloadSource;
use crate::config::Config;
use crate::constants::backend::{MAX_ERROR_BODY_LEN, PREDICTIONS_PATH, REQUEST_CONTENT_TYPE};
use crate::constants::timeouts;
use crate::error::{AppError, InferenceError};
use crate::reliability::metrics::record_inference_duration;
use crate::reliability::{retry_with_backoff, RateLimiter, RetryPolicy};
use crate::types::InferenceOutcome;

/// Anything that can turn a model name and payload reference into an outcome.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn predict(
        &self,
        model_name: &str,
        payload_reference: &str,
    ) -> Result<InferenceOutcome, InferenceError>;
}

/// Settings for [`InferenceClient`].
#[derive(Debug, Clone)]
pub struct InferenceClientConfig {
    /// Backend base URL, e.g. `http://torchserve:8080`.
    pub base_url: String,
    /// Hard limit for one call, retries included.
    pub call_timeout: Duration,
    /// How long to wait for a rate-limiter permit.
    pub acquire_timeout: Duration,
    /// Backoff for transport failures.
    pub retry: RetryPolicy,
}

impl InferenceClientConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.backend_url.clone(),
            call_timeout: config.backend_timeout,
            acquire_timeout: config.rate_limit_acquire_timeout(),
            retry: config.retry_policy(),
        }
    }
}

/// Rate-limited, timeout-bounded backend client.
pub struct InferenceClient {
    http: reqwest::Client,
    base_url: Url,
    call_timeout: Duration,
    acquire_timeout: Duration,
    retry: RetryPolicy,
    limiter: Arc<RateLimiter>,
    payloads: Arc<dyn PayloadSource>,
}

impl InferenceClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `config` - Endpoint, timeouts and retry policy.
    /// * `limiter` - Process-wide rate limiter shared with other callers.
    /// * `payloads` - Source the payload references are resolved against.
    pub fn new(
        config: InferenceClientConfig,
        limiter: Arc<RateLimiter>,
        payloads: Arc<dyn PayloadSource>,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeouts::BACKEND_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| AppError::Config(format!("Invalid backend URL '{}': {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "Backend URL '{}' cannot carry a path",
                config.base_url
            )));
        }

        Ok(Self {
            http,
            base_url,
            call_timeout: config.call_timeout,
            acquire_timeout: config.acquire_timeout,
            retry: config.retry,
            limiter,
            payloads,
        })
    }

    /// `{base_url}/predictions/{model}` with the model name encoded as a
    /// single path segment.
    fn predictions_url(&self, model_name: &str) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`: the base URL can carry path segments.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(PREDICTIONS_PATH)
                .push(model_name);
        }
        url
    }

    async fn call_with_retry(
        &self,
        model_name: &str,
        payload: Bytes,
    ) -> Result<(Bytes, Option<String>), InferenceError> {
        let url = self.predictions_url(model_name);

        retry_with_backoff(
            &self.retry,
            "inference call",
            || self.call_once(url.clone(), model_name, payload.clone()),
            |e| matches!(e, InferenceError::BackendUnreachable { .. }),
        )
        .await
        .map_err(|e| match e.last_error {
            InferenceError::BackendUnreachable { message, .. } => {
                InferenceError::BackendUnreachable {
                    attempts: e.attempts,
                    message,
                }
            }
            other => other,
        })
    }

    async fn call_once(
        &self,
        url: Url,
        model_name: &str,
        payload: Bytes,
    ) -> Result<(Bytes, Option<String>), InferenceError> {
        let transport = |e: reqwest::Error| InferenceError::BackendUnreachable {
            attempts: 1,
            message: e.to_string(),
        };

        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, REQUEST_CONTENT_TYPE)
            .body(payload)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(InferenceError::ModelNotFound(model_name.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::BackendError {
                status: status.as_u16(),
                message: truncate(body.trim(), MAX_ERROR_BODY_LEN),
            });
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(transport)?;

        Ok((body, declared))
    }
}

#[async_trait]
impl InferenceBackend for InferenceClient {
    #[instrument(skip(self), fields(model = %model_name))]
    async fn predict(
        &self,
        model_name: &str,
        payload_reference: &str,
    ) -> Result<InferenceOutcome, InferenceError> {
        let _permit = self
            .limiter
            .acquire(self.acquire_timeout)
            .await
            .map_err(|e| InferenceError::RateLimited(e.waited))?;

        let payload = self.payloads.load(payload_reference).await?;

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.call_timeout,
            self.call_with_retry(model_name, payload),
        )
        .await
        .unwrap_or(Err(InferenceError::Timeout(self.call_timeout)));
        record_inference_duration(model_name, started.elapsed());

        let (body, declared) = result.map_err(|e| {
            warn!("Inference call for model {} failed: {}", model_name, e);
            e
        })?;

        let outcome = classify_with_hint(&body, model_name, declared.as_deref());
        debug!(
            "Backend returned {} bytes, classified as {}",
            body.len(),
            outcome.kind()
        );
        Ok(outcome)
    }
}

fn truncate(text: &str, max_len: usize) -> String {
    match text.char_indices().nth(max_len) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::payload::FsPayloadSource;
    use crate::reliability::RateLimiterConfig;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::Router;
    use serde_json::json;
    use tempfile::TempDir;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

    async fn fake_backend(
        Path(model): Path<String>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        if headers.get("content-type").map(|v| v.as_bytes()) != Some(b"application/octet-stream")
            || body.as_ref() != b"cat-bytes"
        {
            return (HttpStatus::BAD_REQUEST, "unexpected request").into_response();
        }

        match model.as_str() {
            "resnet" => axum::Json(json!({"label": "cat", "score": 0.9})).into_response(),
            "segmenter" => ([("content-type", "image/png")], PNG).into_response(),
            "broken" => (HttpStatus::INTERNAL_SERVER_ERROR, "boom").into_response(),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                axum::Json(json!({})).into_response()
            }
            _ => (HttpStatus::NOT_FOUND, "model not registered").into_response(),
        }
    }

    async fn spawn_backend() -> String {
        let app = Router::new().route("/predictions/:model", post(fake_backend));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn payload_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cat.jpg"), b"cat-bytes").unwrap();
        dir
    }

    fn client(base_url: String, dir: &TempDir, limiter: RateLimiterConfig) -> InferenceClient {
        let config = InferenceClientConfig {
            base_url,
            call_timeout: Duration::from_millis(500),
            acquire_timeout: Duration::from_millis(20),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                multiplier: 2.0,
            },
        };
        InferenceClient::new(
            config,
            Arc::new(RateLimiter::new(limiter)),
            Arc::new(FsPayloadSource::new(dir.path())),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_structured_prediction() {
        let dir = payload_dir();
        let client = client(spawn_backend().await, &dir, RateLimiterConfig::default());

        let outcome = client.predict("resnet", "cat.jpg").await.unwrap();
        assert_eq!(
            outcome,
            InferenceOutcome::Structured {
                model_name: "resnet".into(),
                results: vec![json!({"label": "cat", "score": 0.9})],
            }
        );
    }

    #[tokio::test]
    async fn test_binary_prediction() {
        let dir = payload_dir();
        let client = client(spawn_backend().await, &dir, RateLimiterConfig::default());

        match client.predict("segmenter", "cat.jpg").await.unwrap() {
            InferenceOutcome::Binary {
                content_type,
                bytes,
                ..
            } => {
                assert_eq!(content_type, "image/png");
                assert_eq!(bytes.as_ref(), PNG);
            }
            other => panic!("expected binary outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_errors_are_classified() {
        let dir = payload_dir();
        let client = client(spawn_backend().await, &dir, RateLimiterConfig::default());

        let missing = client.predict("unknown-model", "cat.jpg").await.unwrap_err();
        assert_eq!(missing, InferenceError::ModelNotFound("unknown-model".into()));

        match client.predict("broken", "cat.jpg").await.unwrap_err() {
            InferenceError::BackendError { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("expected backend error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let dir = payload_dir();
        let client = client(spawn_backend().await, &dir, RateLimiterConfig::default());

        let err = client.predict("slow", "cat.jpg").await.unwrap_err();
        assert_eq!(err, InferenceError::Timeout(Duration::from_millis(500)));
    }

    #[tokio::test]
    async fn test_unreachable_backend_exhausts_retries() {
        let dir = payload_dir();
        let client = client(
            "http://127.0.0.1:1".to_string(),
            &dir,
            RateLimiterConfig::default(),
        );

        match client.predict("resnet", "cat.jpg").await.unwrap_err() {
            InferenceError::BackendUnreachable { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected unreachable backend, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exhausted_limiter_rejects_call() {
        let dir = payload_dir();
        let client = client(
            spawn_backend().await,
            &dir,
            RateLimiterConfig {
                capacity: 1,
                refill_period: Duration::from_secs(60),
            },
        );

        client.predict("resnet", "cat.jpg").await.unwrap();
        let err = client.predict("resnet", "cat.jpg").await.unwrap_err();
        assert!(matches!(err, InferenceError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_missing_payload_is_reported() {
        let dir = payload_dir();
        let client = client(spawn_backend().await, &dir, RateLimiterConfig::default());

        let err = client.predict("resnet", "dog.jpg").await.unwrap_err();
        assert!(matches!(err, InferenceError::PayloadUnavailable(_)));
    }

    #[test]
    fn test_model_name_is_one_path_segment() {
        let dir = payload_dir();
        let client = client(
            "http://backend:8080/".to_string(),
            &dir,
            RateLimiterConfig::default(),
        );

        assert_eq!(
            client.predictions_url("resnet").as_str(),
            "http://backend:8080/predictions/resnet"
        );
        assert_eq!(
            client.predictions_url("../ping").as_str(),
            "http://backend:8080/predictions/..%2Fping"
        );
        assert_eq!(
            client.predictions_url("m?x=1").as_str(),
            "http://backend:8080/predictions/m%3Fx=1"
        );
    }

    #[tokio::test]
    async fn test_model_name_cannot_reach_another_endpoint() {
        let dir = payload_dir();
        let client = client(spawn_backend().await, &dir, RateLimiterConfig::default());

        let err = client
            .predict("resnet/../segmenter", "cat.jpg")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            InferenceError::ModelNotFound("resnet/../segmenter".into())
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let dir = payload_dir();
        let result = InferenceClient::new(
            InferenceClientConfig {
                base_url: "not a url".to_string(),
                call_timeout: Duration::from_secs(1),
                acquire_timeout: Duration::from_secs(1),
                retry: RetryPolicy::default(),
            },
            Arc::new(RateLimiter::new(RateLimiterConfig::default())),
            Arc::new(FsPayloadSource::new(dir.path())),
        );
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 2), "éé...");
    }
}
