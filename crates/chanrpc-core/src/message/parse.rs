//! Parsing messages from generic JSON values.

use super::{Message, MessageId, RpcError};
use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use serde_json::{Map, Value};

impl Message {
    /// Parse raw bytes into a validated message.
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_slice(data).map_err(|e| ProtocolError::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    /// Parse a generic JSON value into a validated message.
    ///
    /// Checks the version tag, field types, and the shape rules.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let mut obj = into_object(value)?;

        let jsonrpc = match obj.remove("jsonrpc") {
            Some(Value::String(v)) if v == ProtocolConfig::JSONRPC_VERSION => v,
            Some(other) => return Err(ProtocolError::UnsupportedVersion(other.to_string())),
            None => return Err(ProtocolError::UnsupportedVersion("missing".to_string())),
        };

        let id = match obj.remove("id") {
            Some(v) => parse_id(v)?,
            None => None,
        };

        let method = match obj.remove("method") {
            Some(Value::String(m)) if !m.is_empty() => Some(m),
            Some(Value::String(_)) => {
                return Err(ProtocolError::InvalidRequest("method is empty".to_string()))
            }
            Some(other) => {
                return Err(ProtocolError::InvalidRequest(format!(
                    "method must be a string, got {}",
                    other
                )))
            }
            None => None,
        };

        let error = match obj.remove("error") {
            Some(v) => Some(parse_error_object(v)?),
            None => None,
        };

        let msg = Message {
            jsonrpc,
            id,
            method,
            params: obj.remove("params"),
            result: obj.remove("result"),
            error,
        };

        msg.validate()?;
        Ok(msg)
    }

    /// Parse a value that must be a request or notification.
    pub fn parse_request(value: Value) -> Result<Self, ProtocolError> {
        let is_object = value.as_object().is_some_and(|o| o.contains_key("method"));
        if !is_object {
            return Err(ProtocolError::InvalidRequest("no method".to_string()));
        }
        Self::from_value(value)
    }

    /// Parse a value that must be a response or error response.
    pub fn parse_response(value: Value) -> Result<Self, ProtocolError> {
        let has_id = value.as_object().is_some_and(|o| o.contains_key("id"));
        if !has_id {
            return Err(ProtocolError::InvalidRequest(
                "id not found, can't be treated as response".to_string(),
            ));
        }
        let msg = Self::from_value(value)?;
        if msg.has_request_fields() {
            return Err(ProtocolError::InvalidRequest(
                "expected a response, got a request".to_string(),
            ));
        }
        Ok(msg)
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>, ProtocolError> {
    match value {
        Value::Object(obj) => Ok(obj),
        other => Err(ProtocolError::InvalidRequest(format!(
            "message must be an object, got {}",
            type_name(&other)
        ))),
    }
}

fn parse_id(value: Value) -> Result<Option<MessageId>, ProtocolError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(MessageId::Str(s))),
        Value::Number(n) => n
            .as_i64()
            .map(|n| Some(MessageId::Num(n)))
            .ok_or_else(|| ProtocolError::InvalidId(n.to_string())),
        other => Err(ProtocolError::InvalidId(type_name(&other).to_string())),
    }
}

fn parse_error_object(value: Value) -> Result<RpcError, ProtocolError> {
    let mut obj = match value {
        Value::Object(obj) => obj,
        other => {
            return Err(ProtocolError::InvalidRequest(format!(
                "error must be an object, got {}",
                type_name(&other)
            )))
        }
    };

    let code = obj.get("code").and_then(Value::as_i64).ok_or_else(|| {
        ProtocolError::InvalidRequest("response has error object, but no integer code".to_string())
    })?;

    let message = match obj.remove("message") {
        Some(Value::String(m)) => m,
        _ => {
            return Err(ProtocolError::InvalidRequest(
                "response has error object, but no message field".to_string(),
            ))
        }
    };

    Ok(RpcError {
        code,
        message,
        data: obj.remove("data"),
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{InvalidMessage, MessageKind};
    use serde_json::json;

    #[test]
    fn test_parse_call() {
        let msg = Message::from_value(json!({
            "jsonrpc": "2.0", "id": "a1", "method": "gbi", "params": {"buffid": "x"}
        }))
        .unwrap();
        assert_eq!(msg.classify(), MessageKind::Request);
        assert_eq!(msg.id, Some(MessageId::Str("a1".into())));
        assert_eq!(msg.params, Some(json!({"buffid": "x"})));
    }

    #[test]
    fn test_parse_error_response() {
        let msg = Message::from_slice(
            br#"{"jsonrpc":"2.0","id":4,"error":{"code":-32001,"message":"invalid buffer id","data":[1]}}"#,
        )
        .unwrap();
        assert_eq!(msg.classify(), MessageKind::ErrorResponse);
        let err = msg.error.unwrap();
        assert_eq!(err.code, -32001);
        assert_eq!(err.data, Some(json!([1])));
    }

    #[test]
    fn test_null_result_counts_as_present() {
        let msg = Message::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap();
        assert!(msg.is_response());
    }

    #[test]
    fn test_reject_bad_version() {
        let err = Message::from_value(json!({"jsonrpc": "1.0", "method": "m"})).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(_)));

        let err = Message::from_value(json!({"method": "m"})).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(_)));
    }

    #[test]
    fn test_reject_invalid_json() {
        let err = Message::from_slice(b"not valid json").unwrap_err();
        assert!(matches!(err, ProtocolError::Parse(_)));
        assert_eq!(err.rpc_code(), -32700);
    }

    #[test]
    fn test_reject_ambiguous_and_malformed_shapes() {
        let err = Message::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "m", "result": 5}))
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::InvalidMessage(InvalidMessage::BothRequestAndResponse)
        );

        let err = Message::from_value(json!({"jsonrpc": "2.0", "result": 5})).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidMessage(InvalidMessage::ResponseWithoutId));

        let err = Message::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "result": 5, "error": {"code": 1, "message": "x"}
        }))
        .unwrap_err();
        assert_eq!(err, ProtocolError::InvalidMessage(InvalidMessage::BothResultAndError));
    }

    #[test]
    fn test_reject_bad_field_types() {
        assert!(matches!(
            Message::from_value(json!({"jsonrpc": "2.0", "id": 1.5, "method": "m"})),
            Err(ProtocolError::InvalidId(_))
        ));
        assert!(matches!(
            Message::from_value(json!({"jsonrpc": "2.0", "id": [1], "method": "m"})),
            Err(ProtocolError::InvalidId(_))
        ));
        assert!(matches!(
            Message::from_value(json!({"jsonrpc": "2.0", "method": 7})),
            Err(ProtocolError::InvalidRequest(_))
        ));
        assert!(matches!(
            Message::from_value(json!({"jsonrpc": "2.0", "id": 1, "error": {"message": "x"}})),
            Err(ProtocolError::InvalidRequest(_))
        ));
        assert!(matches!(
            Message::from_value(json!([1, 2])),
            Err(ProtocolError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_strict_request_and_response_parsers() {
        assert!(Message::parse_request(json!({"jsonrpc": "2.0", "id": 1, "result": 1})).is_err());
        assert!(Message::parse_request(json!({"jsonrpc": "2.0", "method": "n"})).is_ok());

        assert!(Message::parse_response(json!({"jsonrpc": "2.0", "method": "n"})).is_err());
        assert!(Message::parse_response(json!({"jsonrpc": "2.0", "id": 2, "method": "n"})).is_err());
        assert!(Message::parse_response(json!({"jsonrpc": "2.0", "id": 2, "result": {}})).is_ok());
    }

    #[test]
    fn test_null_id_means_absent() {
        let msg = Message::from_value(json!({"jsonrpc": "2.0", "id": null, "method": "m"})).unwrap();
        assert!(msg.is_notification());
    }
}
