//! JSON-RPC 2.0 message model.
//!
//! A [`Message`] is one wire unit. It is either request-shaped (has a
//! method) or response-shaped (has a result or an error), never both.
//! A request with an id is a call; without one it is a notification.
//!
//! ```text
//! {"jsonrpc":"2.0", "id"?, "method"?, "params"?, "result"?, "error"?{code,message,data?}}
//! ```

mod parse;

use crate::config::ProtocolConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Standard and implementation-defined JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const PROTOCOL_ERROR: i64 = -32000;
    pub const INVALID_BUFFER_ID: i64 = -32001;
    pub const SERVER_ERROR_MIN: i64 = -32099;
    pub const SERVER_ERROR_MAX: i64 = -32000;

    /// Whether `code` falls in the implementation-defined server error range.
    pub fn is_server_error(code: i64) -> bool {
        (SERVER_ERROR_MIN..=SERVER_ERROR_MAX).contains(&code)
    }

    /// Whether `code` says the request itself was malformed.
    pub fn is_request_error(code: i64) -> bool {
        code == PARSE_ERROR || (INVALID_PARAMS..=INVALID_REQUEST).contains(&code)
    }
}

/// Correlation identifier: a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Num(i64),
    Str(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Num(n) => write!(f, "{}", n),
            MessageId::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        MessageId::Num(n)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        MessageId::Str(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId::Str(s.to_string())
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Reasons a message fails the well-formedness rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidMessage {
    #[error("have both request and response fields")]
    BothRequestAndResponse,
    #[error("doesn't have request or response fields")]
    NeitherRequestNorResponse,
    #[error("response has no id field")]
    ResponseWithoutId,
    #[error("response has both result and error fields")]
    BothResultAndError,
}

/// Classification of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
    Response,
    ErrorResponse,
    Invalid(InvalidMessage),
}

/// One JSON-RPC 2.0 wire message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }
}

impl Message {
    /// Create a request without an id. Becomes a call once an id is set.
    pub fn request(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::default()
        }
    }

    /// Create a notification (request without id).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::request(method, params)
    }

    /// Create a success response.
    pub fn response(id: MessageId, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            ..Self::default()
        }
    }

    /// Create an error response.
    pub fn error_response(id: MessageId, error: RpcError) -> Self {
        Self {
            id: Some(id),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn set_id(&mut self, id: Option<MessageId>) {
        self.id = id;
    }

    pub fn take_id(&mut self) -> Option<MessageId> {
        self.id.take()
    }

    pub fn has_request_fields(&self) -> bool {
        self.method.is_some()
    }

    pub fn has_response_fields(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// Check the well-formedness rules.
    pub fn validate(&self) -> Result<(), InvalidMessage> {
        let request = self.has_request_fields();
        let response = self.has_response_fields();

        if request && response {
            return Err(InvalidMessage::BothRequestAndResponse);
        }
        if !request && !response {
            return Err(InvalidMessage::NeitherRequestNorResponse);
        }
        if response {
            if self.id.is_none() {
                return Err(InvalidMessage::ResponseWithoutId);
            }
            if self.result.is_some() && self.error.is_some() {
                return Err(InvalidMessage::BothResultAndError);
            }
        }
        Ok(())
    }

    pub fn classify(&self) -> MessageKind {
        if let Err(reason) = self.validate() {
            return MessageKind::Invalid(reason);
        }
        match (self.has_request_fields(), self.id.is_some(), self.error.is_some()) {
            (true, true, _) => MessageKind::Request,
            (true, false, _) => MessageKind::Notification,
            (false, _, false) => MessageKind::Response,
            (false, _, true) => MessageKind::ErrorResponse,
        }
    }

    /// Valid request with an id.
    pub fn is_call(&self) -> bool {
        self.classify() == MessageKind::Request
    }

    pub fn is_notification(&self) -> bool {
        self.classify() == MessageKind::Notification
    }

    /// Valid response carrying a result.
    pub fn is_response(&self) -> bool {
        self.classify() == MessageKind::Response
    }

    /// Valid response carrying an error.
    pub fn is_error(&self) -> bool {
        self.classify() == MessageKind::ErrorResponse
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Serialize to bytes with the version tag reset.
    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        if self.jsonrpc == ProtocolConfig::JSONRPC_VERSION {
            serde_json::to_vec(self)
        } else {
            let mut fixed = self.clone();
            fixed.jsonrpc = ProtocolConfig::JSONRPC_VERSION.to_string();
            serde_json::to_vec(&fixed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_with_result_is_invalid() {
        let mut msg = Message::request("m", None);
        msg.result = Some(json!(5));
        let err = msg.validate().unwrap_err();
        assert_eq!(err.to_string(), "have both request and response fields");
        assert_eq!(
            msg.classify(),
            MessageKind::Invalid(InvalidMessage::BothRequestAndResponse)
        );
    }

    #[test]
    fn test_empty_message_is_invalid() {
        assert_eq!(
            Message::default().validate(),
            Err(InvalidMessage::NeitherRequestNorResponse)
        );
    }

    #[test]
    fn test_response_rules() {
        let mut msg = Message::response(MessageId::Num(1), json!("ok"));
        assert_eq!(msg.classify(), MessageKind::Response);

        msg.error = Some(RpcError::new(codes::INTERNAL_ERROR, "boom"));
        assert_eq!(msg.validate(), Err(InvalidMessage::BothResultAndError));

        msg.result = None;
        assert_eq!(msg.classify(), MessageKind::ErrorResponse);

        msg.id = None;
        assert_eq!(msg.validate(), Err(InvalidMessage::ResponseWithoutId));
    }

    #[test]
    fn test_call_and_notification() {
        let notification = Message::notification("ping", None);
        assert!(notification.is_notification());
        assert!(!notification.is_call());

        let call = Message::request("ping", None).with_id("abc");
        assert!(call.is_call());
        assert_eq!(call.classify(), MessageKind::Request);
    }

    #[test]
    fn test_validate_matches_shape_rule() {
        // ok iff exactly one shape, and responses carry an id without both payloads
        for has_method in [false, true] {
            for has_id in [false, true] {
                for has_result in [false, true] {
                    for has_error in [false, true] {
                        let msg = Message {
                            id: has_id.then(|| MessageId::Num(7)),
                            method: has_method.then(|| "m".to_string()),
                            result: has_result.then(|| json!(1)),
                            error: has_error.then(|| RpcError::new(-1, "e")),
                            ..Message::default()
                        };
                        let response = has_result || has_error;
                        let expected = (has_method ^ response)
                            && (!response || (has_id && !(has_result && has_error)));
                        assert_eq!(msg.is_valid(), expected, "{:?}", msg);
                    }
                }
            }
        }
    }

    #[test]
    fn test_serialization_skips_absent_fields() {
        let msg = Message::request("gbi", Some(json!({"buffid": "b"}))).with_id(3);
        let value: Value = serde_json::from_slice(&msg.to_vec().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 3, "method": "gbi", "params": {"buffid": "b"}})
        );
    }

    #[test]
    fn test_to_vec_resets_version() {
        let mut msg = Message::notification("x", None);
        msg.jsonrpc = "1.0".to_string();
        let value: Value = serde_json::from_slice(&msg.to_vec().unwrap()).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
    }

    #[test]
    fn test_server_error_range() {
        assert!(codes::is_server_error(codes::PROTOCOL_ERROR));
        assert!(codes::is_server_error(codes::INVALID_BUFFER_ID));
        assert!(!codes::is_server_error(codes::INTERNAL_ERROR));
    }
}
