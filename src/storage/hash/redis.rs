//! Native Redis protocol client for the hash store.
//!
//! Scripts are sent with `EVALSHA` and fall back to `EVAL` on a cache miss,
//! which [`redis::Script`] handles.

#[cfg(feature = "redis")]
mod implementation {
    use crate::storage::hash::{HashClient, INCREMENT_CLAMPED_SCRIPT, SEED_IF_ABSENT_SCRIPT};
    use crate::{Error, Result};
    use redis::{Client, Connection, RedisError, Script};
    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    /// Redis client bound to one server.
    ///
    /// Keeps one idle connection for reuse. A connection that saw an error is
    /// dropped instead of returned, so the next call reconnects.
    pub struct RedisHashClient {
        client: Client,
        timeout: Duration,
        connection: Mutex<Option<Connection>>,
        increment: Script,
        seed: Script,
    }

    impl RedisHashClient {
        /// Opens a client for `connection_url`.
        ///
        /// No connection is made until the first command.
        ///
        /// # Errors
        ///
        /// Returns an error if the URL is not a valid Redis URL.
        pub fn new(connection_url: &str, timeout: Duration) -> Result<Self> {
            let client = Client::open(connection_url).map_err(|e| Error::OperationFailed {
                operation: "redis_open".to_string(),
                cause: e.to_string(),
            })?;

            Ok(Self {
                client,
                timeout,
                connection: Mutex::new(None),
                increment: Script::new(INCREMENT_CLAMPED_SCRIPT),
                seed: Script::new(SEED_IF_ABSENT_SCRIPT),
            })
        }

        fn get_connection(&self) -> Result<Connection> {
            let cached = self
                .connection
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(conn) = cached {
                return Ok(conn);
            }

            let conn = self
                .client
                .get_connection_with_timeout(self.timeout)
                .map_err(|e| self.map_error("redis_get_connection", &e))?;
            conn.set_read_timeout(Some(self.timeout))
                .map_err(|e| self.map_error("redis_set_read_timeout", &e))?;
            conn.set_write_timeout(Some(self.timeout))
                .map_err(|e| self.map_error("redis_set_write_timeout", &e))?;
            Ok(conn)
        }

        fn return_connection(&self, conn: Connection) {
            *self
                .connection
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(conn);
        }

        /// Runs `f` on a pooled connection, returning it only on success.
        fn with_connection<T>(
            &self,
            operation: &str,
            f: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
        ) -> Result<T> {
            let mut conn = self.get_connection()?;
            match f(&mut conn) {
                Ok(value) => {
                    self.return_connection(conn);
                    Ok(value)
                },
                Err(e) => Err(self.map_error(operation, &e)),
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        fn map_error(&self, operation: &str, err: &RedisError) -> Error {
            if err.is_timeout() {
                Error::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else if err.is_connection_refusal() || err.is_connection_dropped() {
                Error::operation(operation, format!("connection failed: {err}"))
            } else {
                Error::operation(operation, err)
            }
        }
    }

    impl HashClient for RedisHashClient {
        fn increment_clamped(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
            self.with_connection("redis_increment", |conn| {
                self.increment.key(key).arg(field).arg(delta).invoke(conn)
            })
        }

        fn get_all(&self, key: &str) -> Result<HashMap<String, String>> {
            self.with_connection("redis_hgetall", |conn| {
                redis::cmd("HGETALL").arg(key).query(conn)
            })
        }

        fn get_string(&self, key: &str) -> Result<Option<String>> {
            self.with_connection("redis_get", |conn| redis::cmd("GET").arg(key).query(conn))
        }

        fn seed_if_absent(&self, key: &str, entries: &[(String, u64)]) -> Result<usize> {
            self.with_connection("redis_seed", |conn| {
                let mut invocation = self.seed.key(key);
                for (field, value) in entries {
                    invocation.arg(field).arg(*value);
                }
                invocation.invoke(conn)
            })
        }

        fn name(&self) -> &'static str {
            "redis"
        }
    }
}

#[cfg(feature = "redis")]
pub use implementation::RedisHashClient;

#[cfg(not(feature = "redis"))]
mod stub {
    use crate::storage::hash::HashClient;
    use crate::{Error, Result};
    use std::collections::HashMap;
    use std::time::Duration;

    /// Stub Redis client when the feature is not enabled.
    pub struct RedisHashClient;

    impl RedisHashClient {
        /// Creates a new Redis client (stub).
        ///
        /// # Errors
        ///
        /// Always returns an error because the feature is not enabled.
        pub fn new(_connection_url: &str, _timeout: Duration) -> Result<Self> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }
    }

    impl HashClient for RedisHashClient {
        fn increment_clamped(&self, _key: &str, _field: &str, _delta: i64) -> Result<i64> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn get_all(&self, _key: &str) -> Result<HashMap<String, String>> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn get_string(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn seed_if_absent(&self, _key: &str, _entries: &[(String, u64)]) -> Result<usize> {
            Err(Error::FeatureNotEnabled("redis".to_string()))
        }

        fn name(&self) -> &'static str {
            "redis"
        }
    }
}

#[cfg(not(feature = "redis"))]
pub use stub::RedisHashClient;
