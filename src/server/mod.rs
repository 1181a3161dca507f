//! HTTP surface.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET` | `/likes` | `{"likes": {classId: count}}`, always `200` |
//! | `POST` | `/likes` | `{"success": bool, "count": n}` or `400`/`500` `{"error": ...}` |
//! | `GET` | `/health` | `{"status": "ok", "backend": name}` |
//!
//! Every response carries `Cache-Control: no-store, max-age=0`.
//!
//! Store calls are synchronous, so handlers run them on the blocking pool
//! under a deadline. A read that misses the deadline is answered from the
//! snapshot cache.
//!
//! Mutations carry the deadline into the store, which will not start a
//! write once it has passed. The handler waits one extra grace period (the
//! per-call backend timeout) for a write that began just before the
//! deadline, so a mutation reported as failed does not land afterwards.

mod error;

pub use error::{ApiError, INTERNAL_ERROR_MESSAGE};

use crate::config::LikesConfig;
use crate::models::{CounterSnapshot, LikeOutcome, LikeRequest};
use crate::observability::{MetricsConfig, install_prometheus};
use crate::services::{LikesService, MUTATION_FAILED_MESSAGE};
use crate::storage::CounterStore;
use crate::{Error, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, Method, header};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// `Cache-Control` value for every response.
pub const CACHE_CONTROL_VALUE: &str = "no-store, max-age=0";

/// Message for bodies that are not JSON objects.
pub const INVALID_BODY_MESSAGE: &str = "Invalid JSON body";

const MAX_BODY_BYTES: usize = 16 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    service: LikesService,
    operation_timeout: Duration,
    write_grace: Duration,
}

impl AppState {
    /// Creates handler state with no write grace period.
    #[must_use]
    pub const fn new(service: LikesService, operation_timeout: Duration) -> Self {
        Self {
            service,
            operation_timeout,
            write_grace: Duration::ZERO,
        }
    }

    /// Sets how long a mutation may run past its deadline once its write
    /// has started; normally the backend's per-call timeout.
    #[must_use]
    pub const fn with_write_grace(mut self, write_grace: Duration) -> Self {
        self.write_grace = write_grace;
        self
    }

    /// Returns the likes service.
    #[must_use]
    pub const fn service(&self) -> &LikesService {
        &self.service
    }
}

/// Builds the router.
///
/// `allowed_origin` restricts CORS to one origin; any origin is allowed when
/// it is `None`.
pub fn router(state: AppState, allowed_origin: Option<&str>) -> Router {
    Router::new()
        .route("/likes", get(get_likes).post(post_like))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(allowed_origin))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_VALUE),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    match allowed_origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => layer.allow_origin(origin),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Invalid allowed origin, allowing any origin");
            layer.allow_origin(Any)
        },
        None => layer.allow_origin(Any),
    }
}

fn record_request(route: &'static str, status: u16) {
    metrics::counter!(
        "likes_http_requests_total",
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
}

#[allow(clippy::cast_possible_truncation)]
fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

async fn get_likes(State(state): State<AppState>) -> Json<Value> {
    let service = state.service.clone();
    let task = tokio::task::spawn_blocking(move || service.snapshot());

    let snapshot = match tokio::time::timeout(state.operation_timeout, task).await {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Likes read task failed");
            cached_snapshot(&state)
        },
        Err(_) => {
            tracing::warn!(
                timeout_ms = millis(state.operation_timeout),
                "Likes read timed out, serving last known counts"
            );
            cached_snapshot(&state)
        },
    };

    record_request("get_likes", 200);
    Json(json!({ "likes": snapshot }))
}

fn cached_snapshot(state: &AppState) -> CounterSnapshot {
    state
        .service
        .store()
        .cache()
        .last_known()
        .unwrap_or_default()
}

async fn post_like(
    State(state): State<AppState>,
    body: Bytes,
) -> std::result::Result<Json<LikeOutcome>, ApiError> {
    let result = apply_like(&state, &body).await;
    record_request(
        "post_likes",
        result.as_ref().map_or_else(|e| e.status().as_u16(), |_| 200),
    );
    result.map(Json)
}

async fn apply_like(state: &AppState, body: &[u8]) -> std::result::Result<LikeOutcome, ApiError> {
    let request = parse_like_request(body)?;
    let (class_id, action) = request.validate()?;

    let service = state.service.clone();
    let deadline = Instant::now() + state.operation_timeout;
    let task = tokio::task::spawn_blocking(move || service.apply_before(&request, deadline));
    let wait = state.operation_timeout + state.write_grace;

    match tokio::time::timeout(wait, task).await {
        Ok(Ok(outcome)) => Ok(outcome?),
        Ok(Err(e)) => Err(ApiError::Internal(format!("like task failed: {e}"))),
        Err(_) => {
            let err = Error::Timeout {
                operation: "apply_like".to_string(),
                timeout_ms: millis(wait),
            };
            let count = state.service.store().cache().count(&class_id).unwrap_or(0);
            tracing::warn!(
                class_id = %class_id,
                %action,
                error = %err,
                best_known = count,
                "Like action did not finish in time"
            );
            Ok(LikeOutcome::failed(count, MUTATION_FAILED_MESSAGE))
        },
    }
}

/// Reads a `POST /likes` body.
///
/// Numeric class ids are accepted and used in their decimal form. Values a
/// browser client would treat as falsy count as missing.
fn parse_like_request(body: &[u8]) -> std::result::Result<LikeRequest, ApiError> {
    let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) else {
        return Err(ApiError::BadRequest(INVALID_BODY_MESSAGE.to_string()));
    };

    let class_id = match fields.get("classId") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    };
    let action = match fields.get("action") {
        None | Some(Value::Null | Value::Bool(false)) => None,
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    Ok(LikeRequest { class_id, action })
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "backend": state.service.backend_name(),
    }))
}

/// Runs the HTTP server until Ctrl-C or SIGTERM.
///
/// Builds its own runtime. The caller keeps its handle on `store`, so remote
/// clients are dropped after the runtime has shut down.
///
/// # Errors
///
/// Returns an error if the runtime cannot be created, the address cannot be
/// bound, or the server fails.
pub fn serve(config: &LikesConfig, store: Arc<dyn CounterStore>) -> Result<()> {
    let service = LikesService::new(store);
    let state = AppState::new(service, config.operation_timeout())
        .with_write_grace(config.backend_timeout());
    let app = router(state, config.server.allowed_origin.as_deref());
    let addr = config.server.socket_addr();
    let metrics_config = config
        .server
        .metrics_port
        .map(MetricsConfig::on_port)
        .unwrap_or_default();

    let rt = tokio::runtime::Runtime::new().map_err(|e| Error::OperationFailed {
        operation: "create_runtime".to_string(),
        cause: e.to_string(),
    })?;

    let result = rt.block_on(async {
        if let Err(e) = install_prometheus(&metrics_config) {
            tracing::warn!(error = %e, "Metrics exporter disabled");
        }

        let listener =
            tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| Error::OperationFailed {
                    operation: "bind".to_string(),
                    cause: format!("{addr}: {e}"),
                })?;
        tracing::info!(%addr, "Serving likes API");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::OperationFailed {
                operation: "serve".to_string(),
                cause: e.to_string(),
            })
    });

    rt.shutdown_timeout(config.operation_timeout());
    tracing::info!("Server stopped");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_like_request() {
        let request = parse_like_request(br#"{"classId":"12","action":"like"}"#).unwrap();
        assert_eq!(request.class_id.as_deref(), Some("12"));
        assert_eq!(request.action.as_deref(), Some("like"));
    }

    #[test]
    fn test_parse_like_request_numeric_id() {
        let request = parse_like_request(br#"{"classId":12,"action":"unlike"}"#).unwrap();
        assert_eq!(request.class_id.as_deref(), Some("12"));

        let request = parse_like_request(br#"{"classId":0,"action":"like"}"#).unwrap();
        assert_eq!(request.class_id, None);
    }

    #[test]
    fn test_parse_like_request_non_string_action_is_invalid() {
        let request = parse_like_request(br#"{"classId":"1","action":3}"#).unwrap();
        assert!(matches!(
            request.validate(),
            Err(Error::InvalidInput(msg)) if msg == "Invalid action"
        ));
    }

    #[test]
    fn test_parse_like_request_falsy_action_is_missing() {
        for body in [
            &br#"{"classId":"1","action":0}"#[..],
            &br#"{"classId":"1","action":0.0}"#[..],
            &br#"{"classId":"1","action":false}"#[..],
            &br#"{"classId":"1","action":""}"#[..],
        ] {
            let request = parse_like_request(body).unwrap();
            assert!(matches!(
                request.validate(),
                Err(Error::InvalidInput(msg)) if msg == "Missing classId or action"
            ));
        }
    }

    #[test]
    fn test_parse_like_request_rejects_non_objects() {
        for body in [&b"[]"[..], &b"\"like\""[..], &b"not json"[..], &b""[..]] {
            assert_eq!(
                parse_like_request(body).unwrap_err(),
                ApiError::BadRequest(INVALID_BODY_MESSAGE.to_string())
            );
        }
    }
}
