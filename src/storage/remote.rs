//! Shared plumbing for backends reached over HTTP.

use crate::Error;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// Connection settings for a remote store.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    /// Base URL of the store.
    pub url: String,
    /// Bearer token, if the store requires one.
    pub token: Option<SecretString>,
    /// Per-request deadline, covering connect, send and receive.
    pub timeout: Duration,
}

impl RemoteEndpoint {
    /// Creates endpoint settings.
    #[must_use]
    pub fn new(url: impl Into<String>, token: Option<SecretString>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            token,
            timeout,
        }
    }

    /// Attaches the bearer token, if any, to a request.
    pub(crate) fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

/// Builds a blocking HTTP client with the endpoint's timeout.
///
/// Must be called outside of an async context; the blocking client owns its
/// own runtime.
#[must_use]
pub fn build_http_client(timeout: Duration) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder()
        .user_agent(format!("class-likes/{}", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(10);
    if !timeout.is_zero() {
        builder = builder.timeout(timeout).connect_timeout(timeout);
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Maps a transport error, turning deadline expiry into [`Error::Timeout`].
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn transport_error(operation: &str, err: &reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if err.is_connect() {
        Error::operation(operation, format!("connection failed: {err}"))
    } else {
        Error::operation(operation, err)
    }
}

/// Error for a reply with an unexpected status code.
pub(crate) fn status_error(operation: &str, status: reqwest::StatusCode, detail: &str) -> Error {
    if detail.is_empty() {
        Error::operation(operation, format!("unexpected status {}", status.as_u16()))
    } else {
        Error::operation(
            operation,
            format!("unexpected status {}: {detail}", status.as_u16()),
        )
    }
}
