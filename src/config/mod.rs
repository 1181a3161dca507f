//! Configuration management.
//!
//! Settings are layered, later layers winning:
//!
//! 1. [`LikesConfig::default`]
//! 2. a TOML file (`--config`, `CLASS_LIKES_CONFIG`, or the platform config
//!    dir, e.g. `~/.config/class-likes/config.toml`)
//! 3. environment variables (`CLASS_LIKES_*`, plus `KV_REST_API_URL` and
//!    `KV_REST_API_TOKEN` as set by Vercel KV / Upstash integrations)
//!
//! ```toml
//! backend = "rest"
//! data_dir = "data"
//! backend_timeout_ms = 2000
//!
//! [rest]
//! url = "https://example.upstash.io"
//! token = "..."
//!
//! [server]
//! port = 3000
//! ```

use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "CLASS_LIKES_CONFIG";

/// Storage backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process map, lost on restart.
    Memory,
    /// Local JSON file.
    File,
    /// Atomic hash over the native Redis protocol.
    Redis,
    /// Atomic hash over a REST bridge.
    Rest,
    /// Versioned HTTP document.
    Document,
}

impl BackendKind {
    /// Parses a backend name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Some(Self::Memory),
            "file" | "json" => Some(Self::File),
            "redis" => Some(Self::Redis),
            "rest" | "kv" | "upstash" => Some(Self::Rest),
            "document" | "doc" => Some(Self::Document),
            _ => None,
        }
    }

    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Redis => "redis",
            Self::Rest => "rest",
            Self::Document => "document",
        }
    }

    /// Returns true for backends reached over the network.
    #[must_use]
    pub const fn is_remote(self) -> bool {
        matches!(self, Self::Redis | Self::Rest | Self::Document)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind address.
    pub host: IpAddr,
    /// Bind port.
    pub port: u16,
    /// Single origin allowed by CORS; any origin when unset.
    pub allowed_origin: Option<String>,
    /// Port for the Prometheus exporter; disabled when unset.
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
            allowed_origin: None,
            metrics_port: None,
        }
    }
}

impl ServerConfig {
    /// Returns the socket address to bind.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Main configuration.
#[derive(Debug, Clone)]
pub struct LikesConfig {
    /// Explicit backend; auto-detected from credentials when unset.
    pub backend: Option<BackendKind>,
    /// Directory of the file backend.
    pub data_dir: PathBuf,
    /// Native Redis URL. Held as a secret since it may embed a password.
    pub redis_url: Option<SecretString>,
    /// REST bridge URL.
    pub rest_url: Option<String>,
    /// REST bridge bearer token.
    pub rest_token: Option<SecretString>,
    /// Versioned document URL.
    pub document_url: Option<String>,
    /// Versioned document bearer token.
    pub document_token: Option<SecretString>,
    /// Per-call deadline configured on remote clients.
    pub backend_timeout_ms: u64,
    /// Deadline for a whole store call as seen by the HTTP layer.
    ///
    /// Mutations do not start a write after it; retries of the document
    /// store stop there too. A write already in flight gets up to
    /// `backend_timeout_ms` more before the request is answered.
    pub operation_timeout_ms: u64,
    /// Attempts of the document store's optimistic write loop.
    pub retry_max_attempts: u32,
    /// Backoff unit of the optimistic write loop.
    pub retry_backoff_ms: u64,
    /// HTTP listener.
    pub server: ServerConfig,
}

impl Default for LikesConfig {
    fn default() -> Self {
        Self {
            backend: None,
            data_dir: PathBuf::from("data"),
            redis_url: None,
            rest_url: None,
            rest_token: None,
            document_url: None,
            document_token: None,
            backend_timeout_ms: 2_000,
            operation_timeout_ms: 5_000,
            retry_max_attempts: 5,
            retry_backoff_ms: 25,
            server: ServerConfig::default(),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Backend name.
    pub backend: Option<String>,
    /// Data directory.
    pub data_dir: Option<String>,
    /// Remote call deadline.
    pub backend_timeout_ms: Option<u64>,
    /// Store call deadline.
    pub operation_timeout_ms: Option<u64>,
    /// Redis section.
    pub redis: Option<ConfigFileRedis>,
    /// REST bridge section.
    pub rest: Option<ConfigFileRemote>,
    /// Document section.
    pub document: Option<ConfigFileDocument>,
    /// Server section.
    pub server: Option<ConfigFileServer>,
}

/// Redis section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRedis {
    /// Connection URL.
    pub url: Option<String>,
}

/// REST bridge section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRemote {
    /// Endpoint URL.
    pub url: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
}

/// Document section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileDocument {
    /// Document URL.
    pub url: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
    /// Write attempts.
    pub max_attempts: Option<u32>,
    /// Backoff unit.
    pub backoff_ms: Option<u64>,
}

/// Server section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileServer {
    /// Bind address.
    pub host: Option<String>,
    /// Bind port.
    pub port: Option<u16>,
    /// CORS origin.
    pub allowed_origin: Option<String>,
    /// Prometheus exporter port.
    pub metrics_port: Option<u16>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn secret(value: Option<String>) -> Option<SecretString> {
    non_empty(value).map(SecretString::from)
}

impl LikesConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the layered configuration.
    ///
    /// An explicit `path` must exist; the default locations are optional.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit config file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| non_empty(std::env::var(CONFIG_PATH_ENV).ok()).map(PathBuf::from));

        let base = match explicit {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::load_default(),
        };
        Ok(base.with_env_overrides())
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        Self::parse_toml(&contents)
    }

    /// Parses TOML configuration on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or names an unknown backend.
    pub fn parse_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        Self::from_config_file(file)
    }

    /// Loads configuration from the platform config directory.
    ///
    /// Returns defaults if no readable config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let path = base_dirs
            .config_dir()
            .join("class-likes")
            .join("config.toml");
        if !path.exists() {
            return Self::default();
        }

        Self::load_from_file(&path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
            Self::default()
        })
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(backend) = non_empty(file.backend) {
            config.backend = Some(BackendKind::parse(&backend).ok_or_else(|| {
                Error::InvalidInput(format!("unknown backend '{backend}'"))
            })?);
        }
        if let Some(data_dir) = non_empty(file.data_dir) {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(ms) = file.backend_timeout_ms {
            config.backend_timeout_ms = ms;
        }
        if let Some(ms) = file.operation_timeout_ms {
            config.operation_timeout_ms = ms;
        }
        if let Some(redis) = file.redis {
            config.redis_url = secret(redis.url);
        }
        if let Some(rest) = file.rest {
            config.rest_url = non_empty(rest.url);
            config.rest_token = secret(rest.token);
        }
        if let Some(document) = file.document {
            config.document_url = non_empty(document.url);
            config.document_token = secret(document.token);
            if let Some(attempts) = document.max_attempts {
                config.retry_max_attempts = attempts.max(1);
            }
            if let Some(ms) = document.backoff_ms {
                config.retry_backoff_ms = ms;
            }
        }
        if let Some(server) = file.server {
            if let Some(host) = non_empty(server.host) {
                config.server.host = host.parse().map_err(|_| {
                    Error::InvalidInput(format!("invalid server host '{host}'"))
                })?;
            }
            if let Some(port) = server.port {
                config.server.port = port;
            }
            config.server.allowed_origin = non_empty(server.allowed_origin);
            config.server.metrics_port = server.metrics_port;
        }

        Ok(config)
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary variable source.
    ///
    /// Unparsable values are logged and ignored.
    #[must_use]
    pub fn with_overrides_from(mut self, get: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| non_empty(get(key));

        if let Some(v) = var("CLASS_LIKES_BACKEND") {
            match BackendKind::parse(&v) {
                Some(kind) => self.backend = Some(kind),
                None => tracing::warn!(value = %v, "Ignoring unknown CLASS_LIKES_BACKEND"),
            }
        }
        if let Some(v) = var("CLASS_LIKES_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = var("CLASS_LIKES_REDIS_URL") {
            self.redis_url = Some(SecretString::from(v));
        }
        if let Some(v) = var("KV_REST_API_URL") {
            self.rest_url = Some(v);
        }
        if let Some(v) = var("KV_REST_API_TOKEN") {
            self.rest_token = Some(SecretString::from(v));
        }
        if let Some(v) = var("CLASS_LIKES_DOCUMENT_URL") {
            self.document_url = Some(v);
        }
        if let Some(v) = var("CLASS_LIKES_DOCUMENT_TOKEN") {
            self.document_token = Some(SecretString::from(v));
        }
        if let Some(ms) = parse_var(&var, "CLASS_LIKES_BACKEND_TIMEOUT_MS") {
            self.backend_timeout_ms = ms;
        }
        if let Some(ms) = parse_var(&var, "CLASS_LIKES_OPERATION_TIMEOUT_MS") {
            self.operation_timeout_ms = ms;
        }
        if let Some(attempts) = parse_var::<u32>(&var, "CLASS_LIKES_RETRY_MAX_ATTEMPTS") {
            self.retry_max_attempts = attempts.max(1);
        }
        if let Some(ms) = parse_var(&var, "CLASS_LIKES_RETRY_BACKOFF_MS") {
            self.retry_backoff_ms = ms;
        }
        if let Some(host) = parse_var(&var, "CLASS_LIKES_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_var(&var, "CLASS_LIKES_PORT") {
            self.server.port = port;
        }
        if let Some(origin) = var("CLASS_LIKES_ALLOWED_ORIGIN") {
            self.server.allowed_origin = Some(origin);
        }
        if let Some(port) = parse_var(&var, "CLASS_LIKES_METRICS_PORT") {
            self.server.metrics_port = Some(port);
        }

        self
    }

    /// Sets the backend explicitly.
    #[must_use]
    pub const fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the listener port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    /// Deadline for single remote calls, never zero.
    #[must_use]
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms.max(1))
    }

    /// Deadline for a store call seen by the HTTP layer, never zero.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms.max(1))
    }

    /// Returns true when both REST bridge credentials are present.
    #[must_use]
    pub const fn has_rest_credentials(&self) -> bool {
        self.rest_url.is_some() && self.rest_token.is_some()
    }
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    raw.parse().map_or_else(
        |_| {
            tracing::warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        },
        Some,
    )
}
