/// Stratum wire messages: newline-delimited JSON-RPC requests, responses
/// and `mining.notify` job notifications.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,

    #[serde(default)]
    pub id: Value,

    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratumResponse {
    pub id: Value,

    pub result: Value,

    pub error: Option<StratumError>,
}

impl StratumResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn error(id: Value, error: StratumError) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumError {
    pub code: i32,
    pub message: String,
}

impl StratumError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse_error() -> Self {
        Self::new(Self::PARSE_ERROR, "Parse error")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }
}

/// Server-initiated notification.
#[derive(Debug, Clone, Serialize)]
pub struct StratumNotification {
    pub id: Value,
    pub method: &'static str,
    pub params: Value,
}

/// A job as sent to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNotification {
    /// Per-worker nonce-space partition index.
    pub job_prefix: u32,
    pub pre_hash_hex: String,
    pub target_hex: String,
    pub job_id: u32,
}

impl JobNotification {
    pub fn params(&self) -> Value {
        json!([
            self.job_prefix,
            self.pre_hash_hex,
            self.target_hex,
            self.job_id,
            "0",
            "0",
            "0",
            "0",
            true
        ])
    }

    pub fn to_notification(&self) -> StratumNotification {
        StratumNotification {
            id: Value::Null,
            method: "mining.notify",
            params: self.params(),
        }
    }
}

/// Canonical method after stripping the optional `mining.` namespace.
pub fn normalize_method(method: &str) -> &str {
    method.strip_prefix("mining.").unwrap_or(method)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitParams {
    pub job_id: u32,
    pub nonce: String,
}

fn job_id_from(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl SubmitParams {
    /// Accepts `{"job_id", "nonce"}`, `[job_id, nonce]` or
    /// `[worker, job_id, nonce, ...]`.
    pub fn from_value(params: &Value) -> Option<Self> {
        let (job, nonce) = match params {
            Value::Object(map) => (map.get("job_id")?, map.get("nonce")?),
            Value::Array(items) if items.len() >= 3 => (&items[1], &items[2]),
            Value::Array(items) if items.len() == 2 => (&items[0], &items[1]),
            _ => return None,
        };
        Some(Self {
            job_id: job_id_from(job)?,
            nonce: nonce.as_str()?.to_string(),
        })
    }
}

/// Login address from `["address", ...]` or `{"login": "address"}`.
pub fn authorize_address(params: &Value) -> Option<String> {
    match params {
        Value::Array(items) => items.first()?.as_str().map(str::to_string),
        Value::Object(map) => map
            .get("login")
            .or_else(|| map.get("address"))?
            .as_str()
            .map(str::to_string),
        _ => None,
    }
}
