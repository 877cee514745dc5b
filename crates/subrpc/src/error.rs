// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for RPC operations.
//!
//! `RpcError` covers protocol, usage and transport failures. Errors that a
//! service method declares for its callers live in [`crate::service`] and
//! travel as error replies instead.

use std::fmt;

/// Result type for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors that can occur during RPC operations
#[derive(Debug)]
pub enum RpcError {
    /// Method is not exported by the service
    UndefinedMethod { service: String, method: String },

    /// `reply` was called on a request that carries no `reply_to` subject
    NoReplyPath,

    /// Transport refused or failed to publish/subscribe
    Transport(String),

    /// Failed to encode a message or payload
    Encode(String),

    /// Failed to decode a message or payload
    Decode(String),

    /// Configuration, service or option value is not usable
    InvalidConfig(String),

    /// Handler failed with an error that is not a declared service error
    HandlerFault {
        service: String,
        method: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Client or server was shut down
    Shutdown,
}

impl RpcError {
    /// Create an undefined method error
    pub fn undefined_method(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self::UndefinedMethod {
            service: service.into(),
            method: method.into(),
        }
    }

    /// Create a transport error from anything displayable
    pub fn transport(cause: impl fmt::Display) -> Self {
        Self::Transport(cause.to_string())
    }

    /// Whether this error is a programming/usage error rather than a runtime failure
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::UndefinedMethod { .. } | Self::NoReplyPath | Self::InvalidConfig(_)
        )
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedMethod { service, method } => {
                write!(f, "undefined service method `{}' on {}", method, service)
            }
            Self::NoReplyPath => write!(f, "request has no reply_to subject"),
            Self::Transport(msg) => write!(f, "RPC transport error: {}", msg),
            Self::Encode(msg) => write!(f, "RPC encode error: {}", msg),
            Self::Decode(msg) => write!(f, "RPC decode error: {}", msg),
            Self::InvalidConfig(msg) => write!(f, "Invalid RPC configuration: {}", msg),
            Self::HandlerFault {
                service,
                method,
                source,
            } => write!(f, "Handler fault in {}.{}: {}", service, method, source),
            Self::Shutdown => write!(f, "RPC peer shut down"),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::HandlerFault { source, .. } => Some(&**source),
            _ => None,
        }
    }
}
