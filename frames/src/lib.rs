//! Wire frames for the stickyboard sync socket.
//!
//! Shared by the sync server and the native client. Payloads are
//! `serde_json::Value` on both ends and travel as protobuf `Struct` values in
//! binary websocket messages.
//!
//! PROTOCOL
//! ========
//! ```text
//! client ──request(chunk:subscribe)──▶ server
//! client ◀──────────────done────────── server      (parent_id = request id)
//! client ◀────push(chunk:snapshot)──── server      (no parent, from = "server")
//! ```
//! A request gets exactly one terminal reply, `done` or `error`, except
//! `cursor:set`, which is never answered. Pushes are unsolicited and carry the
//! full value of one path.
//!
//! NUMBERS
//! =======
//! Protobuf `Value` stores every number as `f64`. Integral values within
//! ±2^53 decode back to JSON integers, so millisecond timestamps survive the
//! hop unchanged; everything else stays a float.

use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the retryable flag on error frames.
pub const FRAME_RETRYABLE: &str = "retryable";

/// `from` of every server push.
pub const FROM_SERVER: &str = "server";

/// Largest integer an `f64` holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("invalid frame status: {0}")]
    InvalidStatus(i32),
}

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// TYPES
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// A client request, or an unsolicited server push.
    Request,
    Done,
    Error,
}

impl Status {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        let wire = match self {
            Self::Request => WireStatus::Request,
            Self::Done => WireStatus::Done,
            Self::Error => WireStatus::Error,
        };
        wire as i32
    }

    fn from_i32(value: i32) -> Result<Self, CodecError> {
        match WireStatus::try_from(value) {
            Ok(WireStatus::Request) => Ok(Self::Request),
            Ok(WireStatus::Done) => Ok(Self::Done),
            Ok(WireStatus::Error) => Ok(Self::Error),
            Err(_) => Err(CodecError::InvalidStatus(value)),
        }
    }

    /// A reply that ends its request.
    #[must_use]
    pub fn is_reply(self) -> bool {
        !matches!(self, Self::Request)
    }
}

/// One message on the sync socket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// UUID string.
    pub id: String,
    /// The request this frame answers.
    pub parent_id: Option<String>,
    /// Milliseconds since the Unix epoch at creation.
    pub ts: i64,
    /// Participant id on inbound requests, [`FROM_SERVER`] on pushes.
    pub from: Option<String>,
    /// `<prefix>:<op>`, e.g. `"chunk:append"`.
    pub syscall: String,
    pub status: Status,
    pub data: Value,
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Frame {
    fn new(syscall: String, status: Status, parent_id: Option<String>, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id,
            ts: now_ms(),
            from: None,
            syscall,
            status,
            data,
        }
    }

    /// A client request.
    pub fn request(syscall: impl Into<String>, data: Value) -> Self {
        Self::new(syscall.into(), Status::Request, None, data)
    }

    /// An unsolicited server-to-client frame.
    pub fn push(syscall: impl Into<String>, data: Value) -> Self {
        Self { from: Some(FROM_SERVER.to_owned()), ..Self::request(syscall, data) }
    }

    /// Successful reply with an empty payload.
    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Value::Object(Map::new()))
    }

    #[must_use]
    pub fn done_with(&self, data: Value) -> Self {
        self.reply(Status::Done, data)
    }

    /// Error reply carrying only a message.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert(FRAME_MESSAGE.into(), Value::String(message.into()));
        self.reply(Status::Error, Value::Object(data))
    }

    /// Error reply carrying code, message and retryable flag.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Map::new();
        data.insert(FRAME_CODE.into(), Value::String(err.error_code().to_owned()));
        data.insert(FRAME_MESSAGE.into(), Value::String(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), Value::Bool(err.retryable()));
        self.reply(Status::Error, Value::Object(data))
    }

    fn reply(&self, status: Status, data: Value) -> Self {
        Self::new(self.syscall.clone(), status, Some(self.id.clone()), data)
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl Frame {
    /// Everything before the first `:`.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.syscall.split_once(':').map_or(&self.syscall, |(prefix, _)| prefix)
    }

    /// Everything after the first `:`.
    #[must_use]
    pub fn op(&self) -> &str {
        self.syscall.split_once(':').map_or("", |(_, op)| op)
    }

    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Error message carried by an error frame, or a generic fallback.
    #[must_use]
    pub fn error_message(&self) -> &str {
        self.str_field(FRAME_MESSAGE).unwrap_or("request failed")
    }
}

// =============================================================================
// CODEC
// =============================================================================

#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let wire = WireFrame {
        id: frame.id.clone(),
        parent_id: frame.parent_id.clone(),
        ts: frame.ts,
        from: frame.from.clone(),
        syscall: frame.syscall.clone(),
        status: frame.status.as_i32(),
        data: Some(to_proto(&frame.data)),
    };
    // A Vec grows as needed, so encoding cannot run out of buffer.
    wire.encode_to_vec()
}

/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes and
/// [`CodecError::InvalidStatus`] for an unknown status value.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let wire = WireFrame::decode(bytes)?;
    Ok(Frame {
        id: wire.id,
        parent_id: wire.parent_id,
        ts: wire.ts,
        from: wire.from,
        syscall: wire.syscall,
        status: Status::from_i32(wire.status)?,
        data: wire.data.map_or_else(|| Value::Object(Map::new()), |v| to_json(&v)),
    })
}

fn to_proto(value: &Value) -> prost_types::Value {
    use prost_types::value::Kind;

    let kind = match value {
        Value::Null => Kind::NullValue(prost_types::NullValue::NullValue as i32),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(prost_types::ListValue { values: items.iter().map(to_proto).collect() }),
        Value::Object(map) => Kind::StructValue(prost_types::Struct {
            fields: map.iter().map(|(k, v)| (k.clone(), to_proto(v))).collect(),
        }),
    };
    prost_types::Value { kind: Some(kind) }
}

fn to_json(value: &prost_types::Value) -> Value {
    use prost_types::value::Kind;

    match &value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::NumberValue(n)) => number(*n),
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::StructValue(s)) => Value::Object(s.fields.iter().map(|(k, v)| (k.clone(), to_json(v))).collect()),
        Some(Kind::ListValue(l)) => Value::Array(l.values.iter().map(to_json).collect()),
    }
}

/// Integral floats in the exact range become integers; NaN and infinities become null.
#[allow(clippy::cast_possible_truncation)]
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}

#[derive(Clone, PartialEq, Message)]
struct WireFrame {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, optional, tag = "2")]
    parent_id: Option<String>,
    #[prost(int64, tag = "3")]
    ts: i64,
    #[prost(string, optional, tag = "4")]
    from: Option<String>,
    #[prost(string, tag = "5")]
    syscall: String,
    #[prost(enumeration = "WireStatus", tag = "6")]
    status: i32,
    #[prost(message, optional, tag = "7")]
    data: Option<prost_types::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireStatus {
    Request = 0,
    Done = 1,
    Error = 2,
}
