//! Channeler sub-protocol: method names and payloads.
//!
//! ```text
//! n   {id}                  -> true          announce a buffer
//! gbi {buffid}              -> {s: size}     query its size
//! gbs {buffid, start, end}  -> {data: b64}   pull bytes [start, end)
//! ```

use crate::error::ProtocolError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_NEW_BUFFER_AVAILABLE: &str = "n";
pub const METHOD_GET_BUFFER_INFO: &str = "gbi";
pub const METHOD_GET_BUFFER_SLICE: &str = "gbs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBufferParams {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferInfoParams {
    pub buffid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferInfo {
    #[serde(rename = "s")]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceParams {
    pub buffid: String,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceData {
    pub data: String,
}

impl SliceData {
    pub fn encode(bytes: &[u8]) -> Self {
        Self {
            data: STANDARD.encode(bytes),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, ProtocolError> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| ProtocolError::InvalidPayload(format!("bad base64 slice: {}", e)))
    }
}

/// Decode request params, reporting failures as invalid params.
pub fn parse_params<T: DeserializeOwned>(params: Option<&Value>) -> Result<T, ProtocolError> {
    let params = params.ok_or_else(|| ProtocolError::InvalidParams("missing params".to_string()))?;
    T::deserialize(params).map_err(|e| ProtocolError::InvalidParams(e.to_string()))
}

/// Decode a response result, reporting failures as an invalid payload.
pub fn parse_result<T: DeserializeOwned>(result: Option<&Value>) -> Result<T, ProtocolError> {
    let result =
        result.ok_or_else(|| ProtocolError::InvalidPayload("missing result".to_string()))?;
    T::deserialize(result).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
}
