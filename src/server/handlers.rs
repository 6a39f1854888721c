//! HTTP request handlers.
//!
//! This module provides the HTTP handlers for the prediction API. They only
//! translate between HTTP and the [`Dispatcher`](crate::pipeline::Dispatcher).

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
        StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::constants::api::{PREDICTIONS_ROUTE, UNSUPPORTED_RESULTS};
use crate::error::{AppError, Result};
use crate::inference::file_extension;
use crate::server::AppState;
use crate::types::{CacheEntry, CorrelationId, InferenceOutcome, PredictionRequest};

/// Submit a prediction request.
pub async fn submit_prediction(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = payload.map_err(|e| AppError::InvalidInput(e.body_text()))?;
    let id = state.dispatcher.submit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "inference_id": id })),
    ))
}

/// Poll for the result of a prediction.
pub async fn get_prediction(
    State(state): State<Arc<AppState>>,
    Path(inference_id): Path<String>,
) -> Result<Response> {
    let entry = state
        .dispatcher
        .fetch(&CorrelationId::from(inference_id))
        .await?;
    Ok(render_entry(entry))
}

fn render_entry(entry: CacheEntry) -> Response {
    match entry {
        CacheEntry::Pending => {
            (StatusCode::ACCEPTED, Json(json!({ "status": "pending" }))).into_response()
        }
        CacheEntry::Failed { reason } => (
            StatusCode::OK,
            Json(json!({ "status": "failed", "reason": reason })),
        )
            .into_response(),
        CacheEntry::Done(InferenceOutcome::Structured {
            model_name,
            results,
        }) => Json(json!({
            "status": "done",
            "model_name": model_name,
            "results": results,
        }))
        .into_response(),
        CacheEntry::Done(InferenceOutcome::Unsupported { model_name }) => Json(json!({
            "status": "done",
            "model_name": model_name,
            "results": UNSUPPORTED_RESULTS,
        }))
        .into_response(),
        CacheEntry::Done(InferenceOutcome::Binary {
            model_name,
            content_type,
            bytes,
        }) => {
            let disposition = format!(
                "attachment; filename=\"{}\"",
                download_filename(&model_name, file_extension(&content_type, &bytes))
            );
            (
                [(CONTENT_TYPE, content_type), (CONTENT_DISPOSITION, disposition)],
                bytes,
            )
                .into_response()
        }
    }
}

/// Filename offered for a binary result, limited to visible ASCII so it
/// always fits in a quoted header parameter.
fn download_filename(model_name: &str, extension: &str) -> String {
    let stem: String = model_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    format!("{}_output.{}", stem, extension)
}

/// Health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "prediction-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(metrics) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Create the application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(PREDICTIONS_ROUTE, post(submit_prediction))
        .route(&format!("{}/:inference_id", PREDICTIONS_ROUTE), get(get_prediction))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryResultCache, ResultCache};
    use crate::pipeline::Dispatcher;
    use crate::queue::InMemoryQueue;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use bytes::Bytes;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<InMemoryResultCache>) {
        let cache = Arc::new(InMemoryResultCache::new());
        let dispatcher = Dispatcher::new(cache.clone(), Arc::new(InMemoryQueue::new()));
        let router = create_router(Arc::new(AppState::new(dispatcher, None)));
        (router, cache)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn poll(id: &str) -> Request<Body> {
        Request::get(format!("{}/{}", PREDICTIONS_ROUTE, id))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_submit_then_poll_pending() {
        let (router, _) = app();

        let response = router
            .clone()
            .oneshot(
                Request::post(PREDICTIONS_ROUTE)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"model_name":"resnet","payload_reference":"cat.jpg"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let id = body_json(response).await["inference_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = router.oneshot(poll(&id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await, json!({"status": "pending"}));
    }

    #[tokio::test]
    async fn test_invalid_submissions_are_bad_requests() {
        let (router, cache) = app();

        for body in [r#"{"payload_reference":"cat.jpg"}"#, r#"{"model_name":"","payload_reference":"x"}"#] {
            let response = router
                .clone()
                .oneshot(
                    Request::post(PREDICTIONS_ROUTE)
                        .header("content-type", "application/json")
                        .body(Body::from(body))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert!(body_json(response).await["error"].is_string());
        }
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let (router, _) = app();
        let response = router.oneshot(poll("never-issued")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_terminal_entries_render() {
        let (router, cache) = app();

        let failed = CorrelationId::from("failed");
        cache
            .put(&failed, &CacheEntry::Failed { reason: "model 'x' not found".into() })
            .await
            .unwrap();
        let response = router.clone().oneshot(poll("failed")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"status": "failed", "reason": "model 'x' not found"})
        );

        let unsupported = CorrelationId::from("unsupported");
        cache
            .put(
                &unsupported,
                &CacheEntry::Done(InferenceOutcome::Unsupported { model_name: "m".into() }),
            )
            .await
            .unwrap();
        let response = router.oneshot(poll("unsupported")).await.unwrap();
        assert_eq!(body_json(response).await["results"], UNSUPPORTED_RESULTS);
    }

    #[tokio::test]
    async fn test_binary_result_is_a_download() {
        let (router, cache) = app();
        let png = Bytes::from_static(b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR");
        cache
            .put(
                &CorrelationId::from("binary"),
                &CacheEntry::Done(InferenceOutcome::Binary {
                    model_name: "segmenter".into(),
                    content_type: "image/png".into(),
                    bytes: png.clone(),
                }),
            )
            .await
            .unwrap();

        let response = router.oneshot(poll("binary")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/png");
        assert_eq!(
            response.headers()[CONTENT_DISPOSITION],
            "attachment; filename=\"segmenter_output.png\""
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, png);
    }

    #[tokio::test]
    async fn test_download_filename_is_header_safe() {
        let (router, cache) = app();

        for (id, model_name, expected) in [
            ("newline", "res\nnet", "attachment; filename=\"res_net_output.bin\""),
            ("space", "my model", "attachment; filename=\"my_model_output.bin\""),
            ("quoted", "a\"b\\c", "attachment; filename=\"a_b_c_output.bin\""),
            ("unicode", "modèle", "attachment; filename=\"mod_le_output.bin\""),
        ] {
            cache
                .put(
                    &CorrelationId::from(id),
                    &CacheEntry::Done(InferenceOutcome::Binary {
                        model_name: model_name.into(),
                        content_type: "application/octet-stream".into(),
                        bytes: Bytes::from_static(&[0xc3, 0x28]),
                    }),
                )
                .await
                .unwrap();

            let response = router.clone().oneshot(poll(id)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[CONTENT_DISPOSITION], expected);
        }
    }
}
