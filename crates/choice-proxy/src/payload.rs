//! Inbound JSON-RPC payloads: body reading and classification.
//!
//! The body is read into memory once. The parsed object drives classification
//! and the audit record; the untouched raw bytes are what get forwarded.

use axum::body::Body;
use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::{ProxyError, Result};

/// JSON-RPC methods that submit a transaction and must be audited.
pub const AUDITED_METHODS: &[&str] = &[
    "eth_sendRawTransaction",
    "eth_sendTransaction",
    "eth_sendRawTransaction_reserve",
    "eth_sendTransaction_reserve",
];

/// Whether a request is recorded and sent to the bidder, or passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Audited,
    PassThrough,
}

/// A parsed request body together with the exact bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct IncomingPayload {
    raw: Bytes,
    fields: Map<String, Value>,
}

impl IncomingPayload {
    /// Parse raw body bytes. The body must be a single JSON object.
    pub fn parse(raw: Bytes) -> Result<Self> {
        match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Object(fields)) => Ok(Self { raw, fields }),
            Ok(other) => Err(ProxyError::InvalidJson(format!(
                "expected an object, found {}",
                kind_name(&other)
            ))),
            Err(e) => Err(ProxyError::InvalidJson(e.to_string())),
        }
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The JSON-RPC method, if present and a string.
    pub fn method(&self) -> Option<&str> {
        self.fields.get("method").and_then(Value::as_str)
    }

    pub fn params(&self) -> Option<&Value> {
        self.fields.get("params")
    }

    /// Split into the forwarding bytes and the parsed object.
    pub fn into_parts(self) -> (Bytes, Map<String, Value>) {
        (self.raw, self.fields)
    }
}

/// Read a whole request body, bounded by `limit` bytes, and parse it.
pub async fn read_payload(body: Body, limit: usize) -> Result<IncomingPayload> {
    let raw = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| ProxyError::MalformedBody(e.to_string()))?;
    IncomingPayload::parse(raw)
}

/// Classify a payload by exact match of its `method` against [`AUDITED_METHODS`].
pub fn classify(payload: &IncomingPayload) -> Classification {
    match payload.method() {
        Some(method) if AUDITED_METHODS.contains(&method) => Classification::Audited,
        _ => Classification::PassThrough,
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
