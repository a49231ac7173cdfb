//! JSON-RPC envelope handling at the bridge boundary.
//!
//! Payloads are opaque: the bridge only reads and writes the `id` field and
//! builds error envelopes of its own. Everything else is forwarded verbatim.

use std::fmt::{Display, Formatter};

use serde_json::{json, Map, Value};

use crate::{AppError, Result};

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

/// Correlation id of a request: a JSON string or integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    /// Integer id (bridge-assigned ids are always of this kind).
    Number(i64),
    /// String id.
    String(String),
}

impl RequestId {
    /// Read an id from a JSON value.
    ///
    /// Returns `None` for `null`, fractional or out-of-range numbers, and
    /// non-scalar values.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    /// JSON form of the id.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::from(s.as_str()),
        }
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        // Counter values never approach i64::MAX within a process lifetime.
        Self::Number(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

/// An inbound request body before id assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    body: Map<String, Value>,
    id: Option<RequestId>,
}

impl IncomingRequest {
    /// Validate a parsed HTTP body.
    ///
    /// The body must be a single JSON object. A missing or `null` id is left
    /// for the bridge to assign.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` for non-object bodies (including
    /// batches) and for ids that are neither string, integer nor null.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(body) = value else {
            return Err(AppError::InvalidRequest(
                "body must be a single JSON object".into(),
            ));
        };

        let id = match body.get("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(RequestId::from_value(raw).ok_or_else(|| {
                AppError::InvalidRequest(format!("unsupported id {raw}"))
            })?),
        };

        Ok(Self { body, id })
    }

    /// Id supplied by the client, if any.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    /// Attach `id` to the request, producing an envelope ready for the peer.
    #[must_use]
    pub fn with_id(self, id: RequestId) -> RequestEnvelope {
        let mut envelope = RequestEnvelope {
            id: id.clone(),
            body: self.body,
        };
        envelope.set_id(id);
        envelope
    }
}

/// A request envelope whose `id` is guaranteed present.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    id: RequestId,
    body: Map<String, Value>,
}

impl RequestEnvelope {
    /// The correlation id.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Replace the correlation id, keeping the field position if present.
    pub fn set_id(&mut self, id: RequestId) {
        self.body.insert("id".to_owned(), id.to_value());
        self.id = id;
    }

    /// Serialise as a single compact JSON line (without the trailing newline).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Codec` if serialisation fails.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(&self.body)
            .map_err(|err| AppError::Codec(format!("failed to serialise request: {err}")))
    }
}

/// A response line received from the peer, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    /// Correlation id read from the line.
    pub id: RequestId,
    /// The peer's line exactly as received, without the newline.
    pub raw: String,
}

/// What a parsed peer document is, from the bridge's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// A response to one of our requests.
    Response(RequestId),
    /// A request initiated by the peer, expecting an answer.
    PeerRequest {
        /// Peer's id for the request.
        id: RequestId,
        /// Requested method.
        method: String,
    },
    /// A notification (method, no id).
    Notification(String),
    /// Anything else: no usable id and no method.
    Unaddressed,
}

/// Classify a parsed peer document.
#[must_use]
pub fn classify(doc: &Value) -> InboundKind {
    let id = doc.get("id").and_then(RequestId::from_value);
    let method = doc.get("method").and_then(Value::as_str).map(str::to_owned);

    match (id, method) {
        (Some(id), Some(method)) => InboundKind::PeerRequest { id, method },
        (Some(id), None) => InboundKind::Response(id),
        (None, Some(method)) => InboundKind::Notification(method),
        (None, None) => InboundKind::Unaddressed,
    }
}

/// Build a JSON-RPC error envelope.
#[must_use]
pub fn error_envelope(id: Option<&RequestId>, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": id.map_or(Value::Null, RequestId::to_value),
    })
}

/// The fixed envelope returned when the HTTP body is not JSON.
#[must_use]
pub fn parse_error() -> Value {
    error_envelope(None, PARSE_ERROR, "Parse error")
}

/// Envelope describing `err` for the request identified by `id`.
#[must_use]
pub fn error_for(id: Option<&RequestId>, err: &AppError) -> Value {
    error_envelope(id, err.rpc_code(), &err.rpc_message())
}
