//! Request and response envelopes.
//!
//! The single source of wire-format truth shared by server and client.
//! Construction and parsing are pure; no I/O and no shared state.
//!
//! A request is `{ "id": u64, "name": string, "args": [...] }`; a response
//! is `{ "id": u64, "success": bool, "data": any }`. Parsing validates the
//! structural invariants and nothing else - argument shapes are the
//! method's concern.

use serde::Serialize;
use serde_json::Value;

use crate::codec::JsonCodec;
use crate::error::{Result, SockwireError};

/// Reserved method name for liveness probes. Answered by the server itself.
pub const PING_METHOD: &str = "__ping";

/// Reserved method name for method discovery. Answered by the server itself.
pub const METHODS_METHOD: &str = "__methods";

/// A call request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Caller-chosen correlation token, unique among the caller's in-flight
    /// requests.
    pub id: u64,
    /// Method name.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

impl Request {
    /// Build a request envelope.
    pub fn new(id: u64, name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            name: name.into(),
            args,
        }
    }

    /// Serialize to a frame payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        JsonCodec::encode(self)
    }

    /// Parse a frame payload as a request.
    ///
    /// Fails with `InvalidRequest` unless `id` is a non-negative integer,
    /// `name` is a string, and `args` is an array (possibly empty).
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let val: Value = JsonCodec::decode(raw)?;

        let id = val
            .get("id")
            .and_then(Value::as_u64)
            .ok_or(SockwireError::InvalidRequest)?;
        let name = val
            .get("name")
            .and_then(Value::as_str)
            .ok_or(SockwireError::InvalidRequest)?
            .to_string();
        let args = match val.get("args") {
            Some(Value::Array(items)) => items.clone(),
            _ => return Err(SockwireError::InvalidRequest),
        };

        Ok(Self { id, name, args })
    }
}

/// A call response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Correlation token copied from the request.
    pub id: u64,
    /// Whether the call succeeded.
    pub success: bool,
    /// Return value on success, error value (possibly null) on failure.
    pub data: Value,
}

impl Response {
    /// Build a success response.
    pub fn ok(id: u64, data: Value) -> Self {
        Self {
            id,
            success: true,
            data,
        }
    }

    /// Build a failure response.
    pub fn fail(id: u64, data: Value) -> Self {
        Self {
            id,
            success: false,
            data,
        }
    }

    /// Serialize to a frame payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        JsonCodec::encode(self)
    }

    /// Parse a frame payload as a response.
    ///
    /// Fails with `InvalidResponse` unless `id` is a non-negative integer
    /// and `success` is a boolean. A missing `data` field reads as null.
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let val: Value = JsonCodec::decode(raw)?;

        let id = val
            .get("id")
            .and_then(Value::as_u64)
            .ok_or(SockwireError::InvalidResponse)?;
        let success = val
            .get("success")
            .and_then(Value::as_bool)
            .ok_or(SockwireError::InvalidResponse)?;
        let data = val.get("data").cloned().unwrap_or(Value::Null);

        Ok(Self { id, success, data })
    }
}

/// Best-effort correlation-id extraction from a payload that failed request
/// validation.
///
/// A malformed request that still carries a numeric `id` gets a failure
/// response; without one there is no one to respond to and the frame is
/// dropped after logging.
pub fn recover_request_id(raw: &[u8]) -> Option<u64> {
    let val: Value = serde_json::from_slice(raw).ok()?;
    val.get("id").and_then(Value::as_u64)
}
