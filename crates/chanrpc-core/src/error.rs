//! Error types for chanrpc.
//!
//! Errors are split so callers can tell a misbehaving peer
//! ([`ProtocolError`]) apart from a local transport fault ([`TransportError`])
//! and from engine states ([`ChannelError::Timeout`], [`ChannelError::Closed`]).

use crate::message::{codes, InvalidMessage, RpcError};
use thiserror::Error;

/// Violations of message well-formedness or of the channeler sub-protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid 'jsonrpc' version: {0}")]
    UnsupportedVersion(String),

    #[error("Invalid message structure: {0}")]
    InvalidMessage(#[from] InvalidMessage),

    #[error("Invalid value type for 'id': {0}")]
    InvalidId(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Frame of {size} bytes exceeds limit (must be < {limit})")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Invalid buffer id: {0}")]
    InvalidBufferId(String),

    #[error("Peer returned slice with invalid size: expected {expected}, got {actual}")]
    SliceLengthMismatch { expected: usize, actual: usize },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Announced buffer of {size} bytes exceeds limit of {limit} bytes")]
    BufferTooLarge { size: u64, limit: u64 },

    #[error("Buffer {0} is already being received")]
    TransferInProgress(String),

    #[error("Peer rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },
}

impl ProtocolError {
    /// JSON-RPC error code used when this error is reported back to the peer.
    pub fn rpc_code(&self) -> i64 {
        match self {
            ProtocolError::Parse(_) => codes::PARSE_ERROR,
            ProtocolError::UnsupportedVersion(_)
            | ProtocolError::InvalidMessage(_)
            | ProtocolError::InvalidId(_)
            | ProtocolError::InvalidRequest(_) => codes::INVALID_REQUEST,
            ProtocolError::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            ProtocolError::InvalidParams(_) => codes::INVALID_PARAMS,
            ProtocolError::InvalidBufferId(_) => codes::INVALID_BUFFER_ID,
            ProtocolError::FrameTooLarge { .. }
            | ProtocolError::SliceLengthMismatch { .. }
            | ProtocolError::InvalidPayload(_)
            | ProtocolError::BufferTooLarge { .. }
            | ProtocolError::TransferInProgress(_)
            | ProtocolError::Rejected { .. } => codes::PROTOCOL_ERROR,
        }
    }
}

/// Failures of the outbound push hook.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport disconnected")]
    Disconnected,

    #[error("Transport error: {0}")]
    Other(String),
}

/// Main error type for chanrpc operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Timed out waiting for response")]
    Timeout,

    #[error("Node is closed")]
    Closed,

    /// The peer reported a failure on its own side, such as exhausted
    /// retries or a broken transport.
    #[error("Peer failed ({code}): {message}")]
    PeerFailed { code: i64, message: String },

    #[error("Too many transfers in progress (limit {limit})")]
    Busy { limit: usize },

    #[error("Invalid usage: {message}")]
    InvalidUsage { message: String },

    #[error("Buffer source error: {message}")]
    Source {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for chanrpc operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> Self {
        ChannelError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<InvalidMessage> for ChannelError {
    fn from(err: InvalidMessage) -> Self {
        ChannelError::Protocol(ProtocolError::InvalidMessage(err))
    }
}

impl ChannelError {
    pub(crate) fn invalid_usage(message: impl Into<String>) -> Self {
        ChannelError::InvalidUsage {
            message: message.into(),
        }
    }

    pub(crate) fn source_io(err: std::io::Error) -> Self {
        ChannelError::Source {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Classify an error response received from the peer.
    ///
    /// Request errors and server-range codes mean the peer refused what was
    /// asked of it. Anything else, notably `-32603`, is a failure on its side.
    pub fn from_peer_error(error: RpcError) -> Self {
        if codes::is_server_error(error.code) || codes::is_request_error(error.code) {
            ProtocolError::Rejected {
                code: error.code,
                message: error.message,
            }
            .into()
        } else {
            ChannelError::PeerFailed {
                code: error.code,
                message: error.message,
            }
        }
    }

    /// True when the peer misbehaved, as opposed to a local or transport fault.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, ChannelError::Protocol(_))
    }

    /// Returns the protocol error if this is one.
    pub fn as_protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            ChannelError::Protocol(e) => Some(e),
            _ => None,
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Only timeouts are retried; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::Timeout)
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Server error codes (-32000 to -32099):
    /// - -32000: Protocol violation
    /// - -32001: Invalid buffer id
    pub fn to_rpc_error_code(&self) -> i64 {
        match self {
            ChannelError::Protocol(e) => e.rpc_code(),
            _ => codes::INTERNAL_ERROR,
        }
    }
}
