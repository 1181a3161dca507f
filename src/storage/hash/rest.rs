//! Redis commands over an HTTPS REST bridge.
//!
//! Speaks the Upstash command protocol used by Vercel KV: every command is a
//! `POST` of a JSON array such as `["HGETALL", "class_likes_v2"]`, answered
//! with `{"result": ...}` or `{"error": "..."}`.

use super::{HashClient, INCREMENT_CLAMPED_SCRIPT, SEED_IF_ABSENT_SCRIPT};
use crate::storage::remote::{RemoteEndpoint, build_http_client, status_error, transport_error};
use crate::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// REST bridge client.
pub struct RestHashClient {
    endpoint: RemoteEndpoint,
    client: reqwest::blocking::Client,
}

impl RestHashClient {
    /// Creates a client for the endpoint.
    ///
    /// Builds a blocking HTTP client, so call it outside of async code.
    #[must_use]
    pub fn new(endpoint: RemoteEndpoint) -> Self {
        let client = build_http_client(endpoint.timeout);
        Self { endpoint, client }
    }

    fn command(&self, operation: &str, args: Vec<String>) -> Result<Value> {
        let request = self.endpoint.authorize(self.client.post(&self.endpoint.url));
        let response = request
            .json(&args)
            .send()
            .map_err(|e| transport_error(operation, &e, self.endpoint.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| transport_error(operation, &e, self.endpoint.timeout))?;
        let reply = serde_json::from_str::<CommandReply>(&body).ok();

        if !status.is_success() {
            let detail = reply.and_then(|r| r.error).unwrap_or_default();
            return Err(status_error(operation, status, &detail));
        }

        parse_reply(operation, reply)
    }
}

fn parse_reply(operation: &str, reply: Option<CommandReply>) -> Result<Value> {
    match reply {
        Some(CommandReply {
            error: Some(error), ..
        }) => Err(Error::operation(operation, error)),
        Some(CommandReply { result, .. }) => Ok(result.unwrap_or(Value::Null)),
        None => Err(Error::operation(operation, "reply is not a command result")),
    }
}

fn as_integer(operation: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::operation(operation, format!("expected integer, got {value}")))
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decodes a `HGETALL` reply, which is a flat `[field, value, ...]` array or,
/// on some bridges, an object.
fn parse_hash(operation: &str, value: Value) -> Result<HashMap<String, String>> {
    match value {
        Value::Null => Ok(HashMap::new()),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(field, value)| (field, scalar_to_string(&value)))
            .collect()),
        Value::Array(items) => {
            if items.len() % 2 != 0 {
                return Err(Error::operation(
                    operation,
                    "HGETALL reply has an odd number of items",
                ));
            }
            Ok(items
                .chunks_exact(2)
                .map(|pair| (scalar_to_string(&pair[0]), scalar_to_string(&pair[1])))
                .collect())
        },
        other => Err(Error::operation(
            operation,
            format!("unexpected HGETALL reply: {other}"),
        )),
    }
}

impl HashClient for RestHashClient {
    fn increment_clamped(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let operation = "rest_increment";
        let value = self.command(
            operation,
            vec![
                "EVAL".to_string(),
                INCREMENT_CLAMPED_SCRIPT.to_string(),
                "1".to_string(),
                key.to_string(),
                field.to_string(),
                delta.to_string(),
            ],
        )?;
        as_integer(operation, &value)
    }

    fn get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let operation = "rest_hgetall";
        let value = self.command(operation, vec!["HGETALL".to_string(), key.to_string()])?;
        parse_hash(operation, value)
    }

    fn get_string(&self, key: &str) -> Result<Option<String>> {
        let value = self.command("rest_get", vec!["GET".to_string(), key.to_string()])?;
        Ok(match value {
            Value::Null => None,
            other => Some(scalar_to_string(&other)),
        })
    }

    fn seed_if_absent(&self, key: &str, entries: &[(String, u64)]) -> Result<usize> {
        let operation = "rest_seed";
        let mut args = vec![
            "EVAL".to_string(),
            SEED_IF_ABSENT_SCRIPT.to_string(),
            "1".to_string(),
            key.to_string(),
        ];
        for (field, value) in entries {
            args.push(field.clone());
            args.push(value.to_string());
        }

        let written = as_integer(operation, &self.command(operation, args)?)?;
        usize::try_from(written).map_err(|e| Error::operation(operation, e))
    }

    fn name(&self) -> &'static str {
        "rest"
    }
}
