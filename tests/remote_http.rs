//! Wire-level tests of the HTTP-based remote stores.
//!
//! Each test binds a small axum server on `127.0.0.1:0` that speaks the
//! remote protocol, then drives the real blocking clients against it:
//! - versioned documents: `ETag`, `If-Match`, `If-None-Match: *`, 409/412
//! - the Redis REST bridge: `HGETALL`, `GET` and `EVAL` command arrays
//!
//! The blocking clients must not run inside a Tokio runtime, so tests are
//! plain `#[test]` functions and the server runs on its own thread.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use class_likes::models::{ClassId, CounterSnapshot, LikeAction, parse_count_str};
use class_likes::storage::{
    CounterStore, DocumentClient, DocumentCounterStore, HASH_KEY, HashCounterStore,
    HttpDocumentClient, INCREMENT_CLAMPED_SCRIPT, LEGACY_KEY, RemoteEndpoint, RestHashClient,
    RetryPolicy, SEED_IF_ABSENT_SCRIPT, WriteOutcome,
};
use class_likes::Error;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

/// Serves `app` on an ephemeral port from a background thread.
fn spawn_server(app: Router) -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });
    rx.recv().unwrap()
}

fn endpoint(url: String, token: &str) -> RemoteEndpoint {
    RemoteEndpoint::new(
        url,
        Some(SecretString::from(token.to_string())),
        Duration::from_secs(2),
    )
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy::default().with_backoff(Duration::from_millis(1))
}

// ============================================================================
// Versioned document server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Preconditions {
    if_match: Option<String>,
    if_none_match: Option<String>,
}

/// Document with a numeric version exposed as a quoted `ETag`.
#[derive(Default)]
struct DocumentServer {
    body: Option<Value>,
    version: u64,
    /// Bumps class "1" just before this many upcoming writes.
    interfere: u32,
    /// Answers this many upcoming reads with 503.
    fetch_failures: u32,
    /// Answers every write with this status instead of applying it.
    put_status: Option<StatusCode>,
    puts: Vec<Preconditions>,
    authorizations: Vec<Option<String>>,
}

type SharedDocument = Arc<Mutex<DocumentServer>>;

impl DocumentServer {
    fn with_body(body: Value) -> SharedDocument {
        Arc::new(Mutex::new(Self {
            body: Some(body),
            version: 1,
            ..Self::default()
        }))
    }

    fn etag(&self) -> Option<String> {
        self.body.as_ref().map(|_| format!("\"v{}\"", self.version))
    }
}

async fn get_document(State(state): State<SharedDocument>, headers: HeaderMap) -> Response {
    let mut doc = state.lock().unwrap();
    doc.authorizations
        .push(header_value(&headers, header::AUTHORIZATION));
    if doc.fetch_failures > 0 {
        doc.fetch_failures -= 1;
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    match (doc.body.clone(), doc.etag()) {
        (Some(body), Some(etag)) => ([(header::ETAG, etag)], Json(body)).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_document(
    State(state): State<SharedDocument>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut doc = state.lock().unwrap();
    doc.authorizations
        .push(header_value(&headers, header::AUTHORIZATION));
    let preconditions = Preconditions {
        if_match: header_value(&headers, header::IF_MATCH),
        if_none_match: header_value(&headers, header::IF_NONE_MATCH),
    };
    doc.puts.push(preconditions.clone());

    if let Some(status) = doc.put_status {
        return status.into_response();
    }

    if doc.interfere > 0 {
        doc.interfere -= 1;
        let mut current = doc.body.clone().unwrap_or_else(|| json!({}));
        let liked = current["1"].as_u64().unwrap_or(0) + 1;
        current["1"] = json!(liked);
        doc.body = Some(current);
        doc.version += 1;
    }

    let current_tag = doc.etag();
    let allowed = match (&preconditions.if_match, &preconditions.if_none_match) {
        (Some(tag), _) => current_tag.as_deref() == Some(tag.as_str()),
        (None, Some(any)) if any == "*" => current_tag.is_none(),
        _ => false,
    };
    if !allowed {
        return StatusCode::PRECONDITION_FAILED.into_response();
    }

    doc.body = Some(body);
    doc.version += 1;
    StatusCode::NO_CONTENT.into_response()
}

fn document_store(
    state: &SharedDocument,
    policy: RetryPolicy,
) -> DocumentCounterStore<HttpDocumentClient> {
    let router = Router::new()
        .route("/likes", get(get_document).put(put_document))
        .with_state(Arc::clone(state));
    let addr = spawn_server(router);
    let client = HttpDocumentClient::new(endpoint(format!("http://{addr}/likes"), "doc-token"));
    DocumentCounterStore::with_policy(client, policy)
}

// ============================================================================
// Versioned document tests
// ============================================================================

#[test]
fn test_missing_document_is_created_with_if_none_match() {
    let state = SharedDocument::default();
    let store = document_store(&state, fast_policy());

    assert!(store.get_all().unwrap().is_empty());
    assert_eq!(store.mutate(&"1".into(), LikeAction::Like).unwrap(), 1);

    let doc = state.lock().unwrap();
    assert_eq!(
        doc.puts,
        vec![Preconditions {
            if_match: None,
            if_none_match: Some("*".to_string()),
        }]
    );
    assert_eq!(doc.body, Some(json!({ "1": 1 })));
    assert!(
        doc.authorizations
            .iter()
            .all(|auth| auth.as_deref() == Some("Bearer doc-token"))
    );
}

#[test]
fn test_stale_if_match_is_retried_against_fresh_document() {
    let state = DocumentServer::with_body(json!({ "1": 10, "2": 4 }));
    state.lock().unwrap().interfere = 1;
    let store = document_store(&state, fast_policy());

    assert_eq!(store.mutate(&"1".into(), LikeAction::Like).unwrap(), 12);

    let doc = state.lock().unwrap();
    let tags: Vec<_> = doc.puts.iter().map(|p| p.if_match.clone()).collect();
    assert_eq!(
        tags,
        vec![Some("\"v1\"".to_string()), Some("\"v2\"".to_string())]
    );
    assert_eq!(doc.body, Some(json!({ "1": 12, "2": 4 })));
}

#[test]
fn test_persistent_precondition_failures_exhaust_retries() {
    let state = DocumentServer::with_body(json!({ "1": 3 }));
    state.lock().unwrap().interfere = u32::MAX;
    let store = document_store(&state, fast_policy().with_max_attempts(3));

    let err = store.mutate(&"2".into(), LikeAction::Like).unwrap_err();

    assert!(matches!(err, Error::Conflict { attempts: 3, .. }));
    let doc = state.lock().unwrap();
    assert_eq!(doc.puts.len(), 3);
    assert_eq!(doc.body.as_ref().unwrap().get("2"), None);
}

#[test]
fn test_write_status_codes_map_to_outcomes() {
    let state = DocumentServer::with_body(json!({ "1": 3 }));
    let store = document_store(&state, fast_policy());
    let snapshot: CounterSnapshot = [("1".to_string(), 4)].into_iter().collect();

    for status in [StatusCode::CONFLICT, StatusCode::PRECONDITION_FAILED] {
        state.lock().unwrap().put_status = Some(status);
        let outcome = store.client().store(&snapshot, Some("\"v1\"")).unwrap();
        assert_eq!(outcome, WriteOutcome::Conflict);
    }

    state.lock().unwrap().put_status = Some(StatusCode::BAD_GATEWAY);
    let err = store.client().store(&snapshot, Some("\"v1\"")).unwrap_err();
    assert!(err.is_retryable());

    state.lock().unwrap().put_status = Some(StatusCode::FORBIDDEN);
    let err = store.client().store(&snapshot, Some("\"v1\"")).unwrap_err();
    assert!(!err.is_retryable());
}

#[test]
fn test_server_errors_on_fetch_are_retried() {
    let state = DocumentServer::with_body(json!({ "1": 1 }));
    state.lock().unwrap().fetch_failures = 1;
    let store = document_store(&state, fast_policy());

    let err = store.client().fetch().unwrap_err();
    assert!(err.is_retryable());

    state.lock().unwrap().fetch_failures = 2;
    assert_eq!(store.mutate(&"1".into(), LikeAction::Like).unwrap(), 2);
}

// ============================================================================
// Redis REST bridge server
// ============================================================================

/// Upstash-style command endpoint over in-memory hashes and strings.
#[derive(Default)]
struct RestServer {
    token: String,
    hashes: HashMap<String, HashMap<String, String>>,
    strings: HashMap<String, String>,
    commands: Vec<Vec<String>>,
    fail_with: Option<StatusCode>,
}

type SharedRest = Arc<Mutex<RestServer>>;

fn is_redis_integer(raw: &str) -> bool {
    raw.parse::<i64>().is_ok_and(|n| n.to_string() == raw)
}

impl RestServer {
    fn execute(&mut self, args: &[String]) -> Result<Value, String> {
        match args {
            [cmd, key] if cmd == "HGETALL" => Ok(self
                .hashes
                .get(key)
                .map(|hash| {
                    hash.iter()
                        .flat_map(|(field, value)| [json!(field), json!(value)])
                        .collect()
                })
                .unwrap_or_else(|| json!([]))),
            [cmd, key] if cmd == "GET" => Ok(self
                .strings
                .get(key)
                .map_or(Value::Null, |value| json!(value))),
            [cmd, script, numkeys, key, argv @ ..] if cmd == "EVAL" && numkeys == "1" => {
                self.eval(script, key, argv)
            },
            _ => Err(format!("ERR unknown command {args:?}")),
        }
    }

    fn eval(&mut self, script: &str, key: &str, argv: &[String]) -> Result<Value, String> {
        if script == INCREMENT_CLAMPED_SCRIPT {
            let [field, delta] = argv else {
                return Err("ERR wrong number of arguments".to_string());
            };
            let delta: i64 = delta.parse().map_err(|_| "ERR bad delta".to_string())?;
            let hash = self.hashes.entry(key.to_string()).or_default();
            let current = match hash.get(field) {
                Some(raw) if is_redis_integer(raw) && !raw.starts_with('-') => {
                    raw.parse::<i64>().unwrap()
                },
                Some(raw) => i64::try_from(parse_count_str(raw).unwrap_or(0)).unwrap(),
                None => 0,
            };
            let next = (current + delta).max(0);
            hash.insert(field.clone(), next.to_string());
            Ok(json!(next))
        } else if script == SEED_IF_ABSENT_SCRIPT {
            if self.hashes.get(key).is_some_and(|hash| !hash.is_empty()) {
                return Ok(json!(0));
            }
            let hash = self.hashes.entry(key.to_string()).or_default();
            for pair in argv.chunks_exact(2) {
                hash.insert(pair[0].clone(), pair[1].clone());
            }
            Ok(json!(argv.len() / 2))
        } else {
            Err("NOSCRIPT unknown script".to_string())
        }
    }
}

async fn run_command(
    State(state): State<SharedRest>,
    headers: HeaderMap,
    Json(args): Json<Vec<String>>,
) -> Response {
    let mut redis = state.lock().unwrap();
    let expected = format!("Bearer {}", redis.token);
    if header_value(&headers, header::AUTHORIZATION).as_deref() != Some(expected.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }

    redis.commands.push(args.clone());
    if let Some(status) = redis.fail_with {
        return (status, Json(json!({ "error": "ERR busy" }))).into_response();
    }

    match redis.execute(&args) {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(error) => (StatusCode::BAD_REQUEST, Json(json!({ "error": error }))).into_response(),
    }
}

fn rest_store(state: &SharedRest, token: &str) -> HashCounterStore<RestHashClient> {
    let router = Router::new()
        .route("/", post(run_command))
        .with_state(Arc::clone(state));
    let addr = spawn_server(router);
    HashCounterStore::new(RestHashClient::new(endpoint(
        format!("http://{addr}/"),
        token,
    )))
}

fn rest_server() -> SharedRest {
    Arc::new(Mutex::new(RestServer {
        token: "kv-token".to_string(),
        ..RestServer::default()
    }))
}

// ============================================================================
// Redis REST bridge tests
// ============================================================================

#[test]
fn test_rest_store_migrates_then_increments() {
    let state = rest_server();
    state
        .lock()
        .unwrap()
        .strings
        .insert(LEGACY_KEY.to_string(), r#"{"1": 3, "2": "8"}"#.to_string());
    let store = rest_store(&state, "kv-token");

    let snapshot = store.get_all().unwrap();
    assert_eq!(snapshot.count("1"), 3);
    assert_eq!(snapshot.count("2"), 8);
    assert_eq!(store.mutate(&ClassId::new("1"), LikeAction::Like).unwrap(), 4);

    let server = state.lock().unwrap();
    let commands = &server.commands;
    assert_eq!(commands[0], ["HGETALL", HASH_KEY]);
    assert_eq!(commands[1], ["GET", LEGACY_KEY]);
    assert_eq!(
        commands[2],
        ["EVAL", SEED_IF_ABSENT_SCRIPT, "1", HASH_KEY, "1", "3", "2", "8"]
    );
    assert_eq!(commands[3], ["HGETALL", HASH_KEY]);
    assert_eq!(
        commands.last().unwrap(),
        &["EVAL", INCREMENT_CLAMPED_SCRIPT, "1", HASH_KEY, "1", "1"]
    );
    assert!(server.strings.contains_key(LEGACY_KEY));
}

#[test]
fn test_rest_unlike_clamps_and_repairs_negative_fields() {
    let state = rest_server();
    state
        .lock()
        .unwrap()
        .hashes
        .entry(HASH_KEY.to_string())
        .or_default()
        .insert("2".to_string(), "-4".to_string());
    let store = rest_store(&state, "kv-token");

    assert_eq!(store.get_all().unwrap().get("2"), Some(0));
    assert_eq!(store.mutate(&"2".into(), LikeAction::Unlike).unwrap(), 0);
    assert_eq!(store.mutate(&"2".into(), LikeAction::Like).unwrap(), 1);
    assert_eq!(
        state.lock().unwrap().commands.last().unwrap()[5],
        LikeAction::Like.delta().to_string()
    );
}

#[test]
fn test_rest_rejected_token_is_not_retryable() {
    let state = rest_server();
    let store = rest_store(&state, "wrong-token");

    let err = store.get_all().unwrap_err();

    assert!(err.to_string().contains("401"));
    assert!(!err.is_retryable());
    assert!(state.lock().unwrap().commands.is_empty());
}

#[test]
fn test_rest_server_error_is_retryable() {
    let state = rest_server();
    state.lock().unwrap().fail_with = Some(StatusCode::SERVICE_UNAVAILABLE);
    let store = rest_store(&state, "kv-token");

    let err = store.mutate(&"1".into(), LikeAction::Like).unwrap_err();

    assert!(err.to_string().contains("ERR busy"));
    assert!(err.is_retryable());
}
