//! The HTTP surface (§6): `POST /events`, `GET /events/{event_id}`, and
//! `GET /health`. Shaped after `toka-orchestration-service`'s router
//! (`axum::Router` + `tower_http::trace::TraceLayer`, handlers taking
//! `State<ServiceState>` and returning `Result<Json<_>, StatusCode>`-shaped
//! responses), generalized here to a dedicated `IntoResponse` error type so
//! every handler can return the same stable `{"error": "..."}` JSON shape
//! on failure instead of a bare status code.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use fluxa_ledger::FluxaError;
use fluxa_types::{CorrelationId, EventId};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

const CORRELATION_HEADER: &str = "x-correlation-id";

/// Build the service's `axum::Router`, instrumented with `tower-http`'s
/// request tracing layer (§10.2).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(submit_event))
        .route("/events/:event_id", get(get_event))
        .route("/health", get(health))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

#[derive(Serialize)]
struct SubmitResponseBody {
    event_id: String,
    status: &'static str,
}

/// `POST /events` (§6). Honors `X-Correlation-ID` and always echoes one
/// back, generating a fresh one if the caller omitted it — on the `202`
/// path and on `400`/`500` alike, since a caller correlating its own logs
/// against ours needs the header regardless of outcome.
async fn submit_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let caller_correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| CorrelationId(s.to_string()));

    let result = fluxa_ingest::submit_logged(
        &body,
        caller_correlation_id.clone(),
        state.blob_store.as_ref(),
        state.queue.as_ref(),
        state.max_inline_bytes,
    )
    .await;

    let mut http_response = match &result {
        Ok(response) => (
            StatusCode::ACCEPTED,
            Json(SubmitResponseBody {
                event_id: response.event_id.0.clone(),
                status: "enqueued",
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    };

    let echoed = match &result {
        Ok(response) => response.correlation_id.clone(),
        Err(_) => caller_correlation_id.unwrap_or_else(CorrelationId::generate),
    };
    insert_correlation_header(&mut http_response, &echoed);
    http_response
}

/// `GET /events/{event_id}` (§4.5, §6).
async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Response {
    match state.relational.get_event(&EventId(event_id)).await {
        Ok(Some(event)) => (StatusCode::OK, Json(event)).into_response(),
        Ok(None) => error_response(&FluxaError::NotFound),
        Err(err) => error_response(&err),
    }
}

fn insert_correlation_header(response: &mut Response, correlation_id: &CorrelationId) {
    if let Ok(value) = HeaderValue::from_str(&correlation_id.0) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Map a [`FluxaError`] to the stable JSON error shape and its HTTP status
/// per §7: `MalformedRequest`/`ValidationFailure` → 400, `NotFound` → 404,
/// everything else (infra faults) → 500.
fn error_response(err: &FluxaError) -> Response {
    let status = match err {
        FluxaError::MalformedRequest(_) | FluxaError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
        FluxaError::NotFound => StatusCode::NOT_FOUND,
        _ => {
            warn!(error = %err, reason_code = err.reason_code(), "infrastructure fault surfaced to HTTP caller");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use fluxa_storage::{MemoryBlobStore, MemoryNotificationBus, MemoryQueue, MemoryStore};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let store = MemoryStore::default();
        AppState {
            ledger: Arc::new(store.clone()),
            relational: Arc::new(store),
            blob_store: Arc::new(MemoryBlobStore::new()),
            queue: Arc::new(MemoryQueue::default()),
            notifier: Arc::new(MemoryNotificationBus::default()),
            batch_size: 10,
            poll_interval: Duration::from_millis(50),
            max_inline_bytes: fluxa_ingest::MAX_INLINE_BYTES,
        }
    }

    #[tokio::test]
    async fn health_returns_200() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_valid_event_returns_202_and_echoes_correlation_id() {
        let app = router(test_state());
        let body = serde_json::json!({
            "user_id": "u1",
            "amount": "10.00",
            "currency": "USD",
            "merchant": "m1",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events")
                    .header("content-type", "application/json")
                    .header(CORRELATION_HEADER, "corr-test-1")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            response.headers().get(CORRELATION_HEADER).unwrap(),
            "corr-test-1"
        );
    }

    #[tokio::test]
    async fn submit_malformed_json_returns_400() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events")
                    .header("content-type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        // A 400 still needs a correlation id for the caller to grep logs by,
        // even though it never supplied one itself.
        assert!(response.headers().get(CORRELATION_HEADER).is_some());
    }

    #[tokio::test]
    async fn submit_malformed_json_echoes_caller_correlation_id_on_400() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events")
                    .header("content-type", "application/json")
                    .header(CORRELATION_HEADER, "corr-error-path")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CORRELATION_HEADER).unwrap(),
            "corr-error-path"
        );
    }

    #[tokio::test]
    async fn full_pipeline_submit_process_then_read() {
        let state = test_state();
        let app = router(state.clone());

        let body = serde_json::json!({
            "user_id": "u1",
            "amount": "42.50",
            "currency": "USD",
            "merchant": "acme",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let submit_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/events")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(submit_response.status(), StatusCode::ACCEPTED);

        let bytes = axum::body::to_bytes(submit_response.into_body(), usize::MAX)
            .await
            .unwrap();
        let submitted: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let event_id = submitted["event_id"].as_str().unwrap().to_string();

        let summary = fluxa_processor::run_batch(
            state.queue.as_ref(),
            10,
            state.ledger.as_ref(),
            state.blob_store.as_ref(),
            state.relational.as_ref(),
            state.notifier.as_ref(),
        )
        .await;
        assert_eq!(summary.acked, 1);

        let read_response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/events/{event_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(read_response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_unknown_event_returns_404() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/events/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
