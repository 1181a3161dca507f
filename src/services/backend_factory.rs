//! Backend factory for storage layer initialization.
//!
//! The counter store is chosen once per process, first match wins:
//!
//! 1. an explicit `backend` setting
//! 2. `KV_REST_API_URL` + `KV_REST_API_TOKEN` → REST hash store
//! 3. `CLASS_LIKES_REDIS_URL` → native Redis hash store
//! 4. `CLASS_LIKES_DOCUMENT_URL` → versioned document store
//! 5. the local JSON file store
//!
//! # Graceful Degradation
//!
//! A remote backend that cannot be constructed (missing credentials, feature
//! not compiled in, malformed URL) is logged and replaced by the file store.
//! If the data directory is not writable either, an in-memory store keeps the
//! process serving.
//!
//! Remote clients use blocking HTTP, so the factory must run outside of any
//! async runtime.

use crate::config::{BackendKind, LikesConfig};
use crate::storage::{
    CounterStore, DocumentCounterStore, FileCounterStore, HashCounterStore, HttpDocumentClient,
    MemoryCounterStore, RedisHashClient, RemoteEndpoint, RestHashClient, RetryPolicy,
};
use crate::{Error, Result};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;

/// Factory for creating counter stores.
pub struct BackendFactory;

impl BackendFactory {
    /// Picks the backend kind for a configuration.
    #[must_use]
    pub fn select(config: &LikesConfig) -> BackendKind {
        if let Some(kind) = config.backend {
            return kind;
        }
        if config.has_rest_credentials() {
            BackendKind::Rest
        } else if config.redis_url.is_some() {
            BackendKind::Redis
        } else if config.document_url.is_some() {
            BackendKind::Document
        } else {
            BackendKind::File
        }
    }

    /// Creates the selected store, degrading to local storage on failure.
    #[must_use]
    pub fn create(config: &LikesConfig) -> Arc<dyn CounterStore> {
        let kind = Self::select(config);
        match Self::try_create(kind, config) {
            Ok(store) => {
                tracing::info!(backend = store.backend_name(), "Counter store ready");
                store
            },
            Err(e) if kind != BackendKind::File => {
                tracing::warn!(
                    backend = %kind,
                    error = %e,
                    "Failed to create counter store, falling back to local file"
                );
                Self::create_local(config)
            },
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Failed to create file store, falling back to memory"
                );
                Arc::new(MemoryCounterStore::new())
            },
        }
    }

    /// Creates a store of exactly `kind`, without fallbacks.
    ///
    /// # Errors
    ///
    /// Returns an error if required settings are missing, the backend's
    /// feature is not compiled in, or the store cannot be opened.
    pub fn try_create(kind: BackendKind, config: &LikesConfig) -> Result<Arc<dyn CounterStore>> {
        match kind {
            BackendKind::Memory => Ok(Arc::new(MemoryCounterStore::new())),
            BackendKind::File => Ok(Arc::new(FileCounterStore::in_dir(&config.data_dir)?)),
            BackendKind::Rest => {
                let (Some(url), Some(token)) = (&config.rest_url, &config.rest_token) else {
                    return Err(missing_setting("KV_REST_API_URL and KV_REST_API_TOKEN"));
                };
                let endpoint =
                    RemoteEndpoint::new(url, Some(token.clone()), config.backend_timeout());
                Ok(Arc::new(HashCounterStore::new(RestHashClient::new(
                    endpoint,
                ))))
            },
            BackendKind::Redis => {
                let url = config
                    .redis_url
                    .as_ref()
                    .ok_or_else(|| missing_setting("CLASS_LIKES_REDIS_URL"))?;
                let client = RedisHashClient::new(url.expose_secret(), config.backend_timeout())?;
                Ok(Arc::new(HashCounterStore::new(client)))
            },
            BackendKind::Document => {
                let url = config
                    .document_url
                    .as_ref()
                    .ok_or_else(|| missing_setting("CLASS_LIKES_DOCUMENT_URL"))?;
                let endpoint = RemoteEndpoint::new(
                    url,
                    config.document_token.clone(),
                    config.backend_timeout(),
                );
                let policy = RetryPolicy::default()
                    .with_max_attempts(config.retry_max_attempts)
                    .with_backoff(Duration::from_millis(config.retry_backoff_ms));
                Ok(Arc::new(DocumentCounterStore::with_policy(
                    HttpDocumentClient::new(endpoint),
                    policy,
                )))
            },
        }
    }

    fn create_local(config: &LikesConfig) -> Arc<dyn CounterStore> {
        match FileCounterStore::in_dir(&config.data_dir) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!(
                    data_dir = %config.data_dir.display(),
                    error = %e,
                    "Failed to create file store, falling back to memory"
                );
                Arc::new(MemoryCounterStore::new())
            },
        }
    }
}

fn missing_setting(setting: &str) -> Error {
    Error::InvalidInput(format!("{setting} must be set"))
}
