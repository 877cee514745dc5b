// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message body encoding.
//!
//! The protocol only needs a symmetric mapping encoder: a map of string
//! keys to values in, bytes out, and back. JSON is the default.

use crate::error::{RpcError, RpcResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Decoded form of one message.
pub type MessageMap = serde_json::Map<String, Value>;

/// Symmetric mapping encoder.
pub trait Codec: Send + Sync + 'static {
    /// Encode a mapping to bytes.
    fn encode(&self, message: &MessageMap) -> RpcResult<Vec<u8>>;

    /// Decode bytes to a mapping.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Decode` if the bytes are not a mapping.
    fn decode(&self, bytes: &[u8]) -> RpcResult<MessageMap>;
}

/// JSON codec (`serde_json`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, message: &MessageMap) -> RpcResult<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| RpcError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> RpcResult<MessageMap> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(RpcError::Decode(format!(
                "expected a mapping, got {}",
                kind_of(&other)
            ))),
            Err(e) => Err(RpcError::Decode(e.to_string())),
        }
    }
}

/// Convert a typed envelope to its mapping form.
pub fn to_map<T: Serialize>(message: &T) -> RpcResult<MessageMap> {
    match serde_json::to_value(message).map_err(|e| RpcError::Encode(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(RpcError::Encode(format!(
            "message must encode to a mapping, got {}",
            kind_of(&other)
        ))),
    }
}

/// Convert a mapping to a typed envelope.
pub fn from_map<T: DeserializeOwned>(map: MessageMap) -> RpcResult<T> {
    serde_json::from_value(Value::Object(map)).map_err(|e| RpcError::Decode(e.to_string()))
}

/// Encode an arbitrary payload into a `Value`.
pub fn to_payload<T: Serialize>(payload: T) -> RpcResult<Value> {
    serde_json::to_value(payload).map_err(|e| RpcError::Encode(e.to_string()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageId, ReplyMessage};
    use serde_json::json;

    #[test]
    fn json_decode_rejects_non_mappings() {
        let codec = JsonCodec;
        assert!(matches!(codec.decode(b"[1,2]"), Err(RpcError::Decode(_))));
        assert!(matches!(codec.decode(b"\"hi\""), Err(RpcError::Decode(_))));
        assert!(matches!(codec.decode(b"{oops"), Err(RpcError::Decode(_))));
    }

    #[test]
    fn envelope_through_json_bytes() {
        let codec = JsonCodec;
        let reply = ReplyMessage::success(MessageId(4), "srv.1", json!({"n": 40}));

        let bytes = codec.encode(&to_map(&reply).unwrap()).unwrap();
        let decoded: ReplyMessage = from_map(codec.decode(&bytes).unwrap()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn to_map_rejects_scalars() {
        assert!(matches!(to_map(&42), Err(RpcError::Encode(_))));
    }

    #[test]
    fn from_map_reports_missing_fields() {
        let mut map = MessageMap::new();
        map.insert("peer_id".to_string(), json!("srv.1"));
        let result: RpcResult<ReplyMessage> = from_map(map);
        assert!(matches!(result, Err(RpcError::Decode(_))));
    }
}
