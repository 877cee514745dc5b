// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core types for the request/reply protocol.
//!
//! Requests and replies are mappings with string keys. These structs are
//! their typed view; [`crate::codec`] turns them into bytes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of one request, unique within the process.
///
/// Assigned from one process-wide monotonic counter starting at 1 and never
/// reused, so clients sharing an inbox never see each other's ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Raw counter value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request sent by a client on a call, mcall or mcast subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// Identity of this request (for reply correlation)
    pub message_id: MessageId,
    /// Id of the requesting peer; requesters that only send `peername`
    /// leave it empty
    #[serde(default)]
    pub peer_id: String,
    /// Name of the requesting peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peername: Option<String>,
    /// Exported method name
    pub method: String,
    /// Request payload (null when absent)
    #[serde(default)]
    pub payload: Value,
    /// Inbox subject for replies; absent on mcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl RequestMessage {
    /// Identity of the requester: `peer_id`, else `peername`.
    pub fn sender(&self) -> &str {
        match (self.peer_id.as_str(), self.peername.as_deref()) {
            ("", Some(name)) => name,
            (id, _) => id,
        }
    }
}

/// Reply published by a server to a request's `reply_to` subject.
///
/// Exactly one of `payload` and `error` is set by the constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyMessage {
    /// Identity of the request being answered (for correlation)
    pub message_id: MessageId,
    /// Id of the replying peer
    pub peer_id: String,
    /// Name of the replying peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peername: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<WireError>,
}

impl ReplyMessage {
    /// Create a successful reply
    pub fn success(message_id: MessageId, peer_id: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id,
            peer_id: peer_id.into(),
            peername: None,
            payload: Some(payload),
            error: None,
        }
    }

    /// Create an error reply
    pub fn error(message_id: MessageId, peer_id: impl Into<String>, error: WireError) -> Self {
        Self {
            message_id,
            peer_id: peer_id.into(),
            peername: None,
            payload: None,
            error: Some(error),
        }
    }

    /// Attach the replying peer's name
    pub fn with_peername(mut self, peername: impl Into<String>) -> Self {
        self.peername = Some(peername.into());
        self
    }

    /// Check if this reply indicates success
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Split into the payload or the error envelope.
    ///
    /// A reply whose payload was `null` (or missing) yields `Value::Null`.
    pub fn into_body(self) -> Result<Value, WireError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.payload.unwrap_or(Value::Null)),
        }
    }
}

/// Error envelope carried by an error reply: `{class, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Wire class name of the declared error
    pub class: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl WireError {
    /// Create a new error envelope
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_without_reply_to_omits_key() {
        let request = RequestMessage {
            message_id: MessageId(7),
            peer_id: "host-1.0".to_string(),
            peername: Some("host-1".to_string()),
            method: "sink".to_string(),
            payload: json!([1, 2]),
            reply_to: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["message_id"], json!(7));
        assert_eq!(value["peername"], json!("host-1"));
        assert!(value.get("reply_to").is_none());
    }

    #[test]
    fn request_accepts_missing_payload() {
        let value = json!({"message_id": 3, "peer_id": "p.1", "method": "ping"});
        let request: RequestMessage = serde_json::from_value(value).unwrap();
        assert_eq!(request.payload, Value::Null);
        assert!(request.reply_to.is_none());
        assert!(request.peername.is_none());
    }

    #[test]
    fn request_with_only_peername_decodes() {
        let value = json!({
            "message_id": 4,
            "peername": "legacy-host",
            "method": "echo",
            "payload": "hi",
            "reply_to": "rpc.Lab.inbox.legacy-host"
        });
        let request: RequestMessage = serde_json::from_value(value).unwrap();
        assert!(request.peer_id.is_empty());
        assert_eq!(request.sender(), "legacy-host");

        let request = RequestMessage {
            peer_id: "legacy-host.0".to_string(),
            ..request
        };
        assert_eq!(request.sender(), "legacy-host.0");
    }

    #[test]
    fn null_payload_reply_is_success() {
        let reply = ReplyMessage::success(MessageId(1), "srv.1", Value::Null);
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value.get("payload"), Some(&Value::Null));
        assert!(value.get("error").is_none());

        let decoded: ReplyMessage = serde_json::from_value(value).unwrap();
        assert!(decoded.is_success());
        assert_eq!(decoded.into_body(), Ok(Value::Null));
    }

    #[test]
    fn error_reply_shape() {
        let reply = ReplyMessage::error(
            MessageId(9),
            "srv.2",
            WireError::new("QuotaExceeded", "too many"),
        );
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "message_id": 9,
                "peer_id": "srv.2",
                "error": {"class": "QuotaExceeded", "message": "too many"}
            })
        );
        assert_eq!(
            reply.into_body(),
            Err(WireError::new("QuotaExceeded", "too many"))
        );
    }

    #[test]
    fn wire_error_message_defaults_to_empty() {
        let error: WireError = serde_json::from_value(json!({"class": "Oops"})).unwrap();
        assert_eq!(error.message, "");
    }
}
