// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol constants and runtime configuration.
//!
//! Subject segments and timeouts are defined here and nowhere else.
//!
//! # Example
//!
//! ```ignore
//! use subrpc::config::RpcConfig;
//! use std::time::Duration;
//!
//! let config = RpcConfig::new()
//!     .with_peer_name("billing-1")
//!     .with_default_timeout(Duration::from_secs(5));
//! config.validate()?;
//! ```

use crate::error::{RpcError, RpcResult};
use std::sync::OnceLock;
use std::time::Duration;

// =======================================================================
// Subject naming
// =======================================================================

/// Root segment of every subject (`rpc.<namespace>...`)
pub const SUBJECT_ROOT: &str = "rpc";

/// Segment for direct calls: `rpc.<svc>.call.<peer-id>`
pub const CALL_SEGMENT: &str = "call";

/// Segment for multicast calls: `rpc.<svc>.mcall`
pub const MCALL_SEGMENT: &str = "mcall";

/// Segment for multicast casts: `rpc.<svc>.mcast`
pub const MCAST_SEGMENT: &str = "mcast";

/// Segment for reply delivery: `rpc.<svc>.inbox.<peer-name>`
pub const INBOX_SEGMENT: &str = "inbox";

// =======================================================================
// Timing
// =======================================================================

/// Timeout applied when neither the caller nor the method declares one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// =======================================================================
// Environment
// =======================================================================

/// Overrides the peer name (`<hostname>-<pid>` otherwise)
pub const ENV_PEER_NAME: &str = "SUBRPC_PEER_NAME";

/// Overrides the subject namespace (service name otherwise)
pub const ENV_NAMESPACE: &str = "SUBRPC_NAMESPACE";

/// Overrides the global default timeout, in milliseconds
pub const ENV_DEFAULT_TIMEOUT_MS: &str = "SUBRPC_DEFAULT_TIMEOUT_MS";

/// Runtime configuration shared by every peer created from one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    /// Peer name override
    pub peer_name: Option<String>,

    /// Subject namespace override (defaults to the service name)
    pub namespace: Option<String>,

    /// Timeout used when neither the call nor the method sets one
    pub default_timeout: Duration,
}

impl Default for RpcConfig {
    /// Reads `SUBRPC_*` environment variables; unparsable values are ignored.
    fn default() -> Self {
        Self {
            peer_name: std::env::var(ENV_PEER_NAME).ok(),
            namespace: std::env::var(ENV_NAMESPACE).ok(),
            default_timeout: std::env::var(ENV_DEFAULT_TIMEOUT_MS)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TIMEOUT),
        }
    }
}

impl RpcConfig {
    /// Configuration with built-in defaults only (environment is not consulted).
    pub fn new() -> Self {
        Self {
            peer_name: None,
            namespace: None,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the peer name.
    pub fn with_peer_name(mut self, name: impl Into<String>) -> Self {
        self.peer_name = Some(name.into());
        self
    }

    /// Set the subject namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the global default timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Check that names can be embedded in subjects.
    pub fn validate(&self) -> RpcResult<()> {
        if let Some(name) = &self.peer_name {
            validate_token("peer name", name)?;
            if name.contains('.') {
                return Err(RpcError::InvalidConfig(format!(
                    "peer name `{}' must not contain '.'",
                    name
                )));
            }
        }
        if let Some(namespace) = &self.namespace {
            validate_token("namespace", namespace)?;
        }
        if self.default_timeout.is_zero() {
            return Err(RpcError::InvalidConfig(
                "default timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Peer name in effect: the override, or the process default.
    pub fn resolved_peer_name(&self) -> String {
        self.peer_name
            .clone()
            .unwrap_or_else(|| default_peer_name().to_string())
    }

    /// Namespace in effect for a service.
    pub fn namespace_for<'a>(&'a self, service_name: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(service_name)
    }
}

/// `<hostname>-<pid>`, computed once per process.
pub fn default_peer_name() -> &'static str {
    static PEER_NAME: OnceLock<String> = OnceLock::new();
    PEER_NAME.get_or_init(|| {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("HOST").ok())
            .unwrap_or_else(|| "localhost".to_string());
        // Dots would split the peer id into extra subject tokens
        format!("{}-{}", hostname.replace('.', "_"), std::process::id())
    })
}

/// Reject tokens that would break or widen a subject.
pub(crate) fn validate_token(what: &str, value: &str) -> RpcResult<()> {
    if value.is_empty() {
        return Err(RpcError::InvalidConfig(format!("{} must not be empty", what)));
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || c == '*' || c == '>')
    {
        return Err(RpcError::InvalidConfig(format!(
            "{} `{}' contains whitespace or wildcard characters",
            what, value
        )));
    }
    if value.starts_with('.') || value.ends_with('.') || value.contains("..") {
        return Err(RpcError::InvalidConfig(format!(
            "{} `{}' has an empty subject token",
            what, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_builtin_defaults() {
        let config = RpcConfig::new();
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert!(config.peer_name.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_peer_name_is_memoized() {
        let first = default_peer_name();
        let second = default_peer_name();
        assert!(std::ptr::eq(first, second));
        assert!(first.ends_with(&format!("-{}", std::process::id())));
        assert!(!first.contains('.'));
    }

    #[test]
    fn default_peer_name_uses_system_hostname() {
        let Some(host) = hostname::get().ok().and_then(|h| h.into_string().ok()) else {
            return;
        };
        if host.is_empty() {
            return;
        }
        let expected = format!("{}-{}", host.replace('.', "_"), std::process::id());
        assert_eq!(default_peer_name(), expected);
    }

    #[test]
    fn peer_name_override_wins() {
        let config = RpcConfig::new().with_peer_name("worker");
        assert_eq!(config.resolved_peer_name(), "worker");
    }

    #[test]
    fn namespace_defaults_to_service_name() {
        let config = RpcConfig::new();
        assert_eq!(config.namespace_for("Math"), "Math");

        let config = config.with_namespace("math-v2");
        assert_eq!(config.namespace_for("Math"), "math-v2");
    }

    #[test]
    fn rejects_bad_tokens() {
        assert!(RpcConfig::new().with_peer_name("").validate().is_err());
        assert!(RpcConfig::new().with_peer_name("a.b").validate().is_err());
        assert!(RpcConfig::new().with_peer_name("a b").validate().is_err());
        assert!(RpcConfig::new().with_namespace("svc.*").validate().is_err());
        assert!(RpcConfig::new().with_namespace("svc..x").validate().is_err());
        assert!(RpcConfig::new().with_namespace("svc.v2").validate().is_ok());
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = RpcConfig::new().with_default_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(RpcError::InvalidConfig(_))
        ));
    }
}
