//! Document store reached over plain HTTP with `ETag` preconditions.

use super::{DocumentClient, VersionedDocument, WriteOutcome};
use crate::models::CounterSnapshot;
use crate::storage::remote::{RemoteEndpoint, build_http_client, status_error, transport_error};
use crate::Result;
use reqwest::StatusCode;
use reqwest::header::{ETAG, IF_MATCH, IF_NONE_MATCH};

/// `GET`/`PUT` client for a JSON document at a fixed URL.
///
/// | Request | Meaning |
/// |---------|---------|
/// | `GET` → `200` + `ETag` | current snapshot and version |
/// | `GET` → `404` | no document yet |
/// | `PUT` + `If-Match` | replace the version read earlier |
/// | `PUT` + `If-None-Match: *` | create the document |
/// | `PUT` → `409`/`412` | conflict, someone else wrote first |
pub struct HttpDocumentClient {
    endpoint: RemoteEndpoint,
    client: reqwest::blocking::Client,
}

impl HttpDocumentClient {
    /// Creates a client for the endpoint.
    ///
    /// Builds a blocking HTTP client, so call it outside of async code.
    #[must_use]
    pub fn new(endpoint: RemoteEndpoint) -> Self {
        let client = build_http_client(endpoint.timeout);
        Self { endpoint, client }
    }
}

fn decode_document(body: &str) -> CounterSnapshot {
    let parsed = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| CounterSnapshot::from_json_lenient(&value));
    match parsed {
        Some((snapshot, repaired)) => {
            if repaired > 0 {
                tracing::warn!(repaired, "Likes document held invalid counts, using zero");
            }
            snapshot
        },
        None => {
            tracing::warn!("Likes document is not a JSON object, treating it as empty");
            CounterSnapshot::new()
        },
    }
}

impl DocumentClient for HttpDocumentClient {
    fn fetch(&self) -> Result<VersionedDocument> {
        let operation = "document_fetch";
        let response = self
            .endpoint
            .authorize(self.client.get(&self.endpoint.url))
            .send()
            .map_err(|e| transport_error(operation, &e, self.endpoint.timeout))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(VersionedDocument::default());
        }
        if !status.is_success() {
            return Err(status_error(operation, status, ""));
        }

        let version = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let body = response
            .text()
            .map_err(|e| transport_error(operation, &e, self.endpoint.timeout))?;

        if version.is_none() {
            tracing::warn!(
                url = %self.endpoint.url,
                "Likes document has no ETag, conditional writes will be rejected"
            );
        }

        Ok(VersionedDocument {
            snapshot: decode_document(&body),
            version,
        })
    }

    fn store(
        &self,
        snapshot: &CounterSnapshot,
        expected_version: Option<&str>,
    ) -> Result<WriteOutcome> {
        let operation = "document_store";
        let request = self.endpoint.authorize(self.client.put(&self.endpoint.url));
        let request = match expected_version {
            Some(version) => request.header(IF_MATCH, version),
            None => request.header(IF_NONE_MATCH, "*"),
        };

        let response = request
            .json(snapshot)
            .send()
            .map_err(|e| transport_error(operation, &e, self.endpoint.timeout))?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Ok(WriteOutcome::Conflict),
            status if status.is_success() => Ok(WriteOutcome::Written),
            status => {
                let detail = response.text().unwrap_or_default();
                Err(status_error(operation, status, detail.trim()))
            },
        }
    }

    fn name(&self) -> &'static str {
        "document"
    }
}

impl std::fmt::Debug for HttpDocumentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDocumentClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
