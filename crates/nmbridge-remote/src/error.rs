//! Error taxonomy for the remote object proxy.

use serde_json::Value;
use thiserror::Error;

/// Result alias used throughout the proxy runtime.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failures surfaced by the transport, dispatcher, and object proxy layer.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn plugin process: {0}")]
    Spawn(String),

    #[error("failed to write frame to plugin: {0}")]
    TransportWrite(#[source] std::io::Error),

    #[error("failed to read frame from plugin: {0}")]
    TransportRead(String),

    #[error("plugin transport is closed")]
    TransportClosed,

    #[error("plugin process exited (code={code:?})")]
    ProcessExited { code: Option<i32> },

    #[error("timed out waiting for plugin response after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("malformed plugin message: {message}")]
    ProtocolDecode {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("failed to encode request envelope: {0}")]
    Encode(#[source] serde_json::Error),

    /// The plugin reported failure; the message is passed through verbatim.
    #[error("[nmcades] {0}")]
    Remote(String),

    #[error("unknown callback")]
    UnknownCallback { envelope: Value },

    #[error("plugin sent more than {rounds} consecutive callbacks")]
    CallbackLimit { rounds: u32 },

    /// The "empty" sentinel: a value did not decode as the expected type.
    #[error("empty: {name} is not a {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("the method {method} cannot be executed")]
    MethodExecution { method: String },

    #[error("unsupported parameter type: {0}")]
    UnsupportedParam(&'static str),

    #[error("invalid date value: {value}")]
    InvalidDate { value: String },

    #[error("plugin version {version} does not satisfy {required}")]
    IncompatiblePlugin { version: String, required: String },

    #[error("session lock poisoned")]
    SessionPoisoned,
}

impl BridgeError {
    pub(crate) fn decode(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::ProtocolDecode {
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn type_mismatch(name: &str, expected: &'static str) -> Self {
        Self::TypeMismatch {
            name: name.to_string(),
            expected,
        }
    }

    /// True for the "nothing useful came back" condition.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. })
    }
}
