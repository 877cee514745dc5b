// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service errors: the errors a method may send back to its caller.
//!
//! Only types implementing [`DeclaredError`] cross the RPC boundary. They
//! travel as `{class, message}` and are rebuilt on the caller's side
//! through an [`ErrorRegistry`] that maps class names to constructors.
//! Any other failure inside a handler is a [`HandlerError::Fault`]: it is
//! reported to the hosting process and never turned into a reply.
//!
//! # Example
//!
//! ```rust
//! use subrpc::service::{DeclaredError, ErrorRegistry};
//! use subrpc::types::WireError;
//!
//! #[derive(Debug)]
//! struct QuotaExceeded(String);
//!
//! impl std::fmt::Display for QuotaExceeded {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str(&self.0)
//!     }
//! }
//!
//! impl std::error::Error for QuotaExceeded {}
//!
//! impl DeclaredError for QuotaExceeded {
//!     const CLASS: &'static str = "QuotaExceeded";
//!     fn from_message(message: String) -> Self {
//!         Self(message)
//!     }
//! }
//!
//! let registry = ErrorRegistry::new().with::<QuotaExceeded>();
//! let error = registry
//!     .reconstruct(&WireError::new("QuotaExceeded", "42 > 10"))
//!     .unwrap();
//! assert!(error.downcast_ref::<QuotaExceeded>().is_some());
//! ```

use crate::error::RpcError;
use crate::types::WireError;
use std::collections::HashMap;
use std::fmt;

/// Boxed error as produced by reconstruction.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error type that may be sent to callers as an error reply.
///
/// `CLASS` is the wire name; the message is the error's `Display` output.
pub trait DeclaredError: std::error::Error + Send + Sync + Sized + 'static {
    /// Wire class name, unique within a deployment
    const CLASS: &'static str;

    /// Rebuild the error from a received message
    fn from_message(message: String) -> Self;

    /// Envelope for an error reply
    fn to_wire(&self) -> WireError {
        WireError::new(Self::CLASS, self.to_string())
    }
}

/// Base declared error, for services that need no dedicated error types.
///
/// Also raised by dispatch when a request names a method the service
/// does not export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    message: String,
}

impl ServiceError {
    /// Create a new service error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ServiceError {}

impl DeclaredError for ServiceError {
    const CLASS: &'static str = "ServiceError";

    fn from_message(message: String) -> Self {
        Self { message }
    }
}

/// Failure returned by a method handler.
#[derive(Debug)]
pub enum HandlerError {
    /// Declared error: sent to the caller as an error reply
    Declared(WireError),

    /// Anything else: a fault of the serving process, never sent
    Fault(BoxError),
}

impl HandlerError {
    /// Wrap an undeclared error
    pub fn fault(error: impl Into<BoxError>) -> Self {
        Self::Fault(error.into())
    }

    /// Check if this error will be sent to the caller
    pub fn is_declared(&self) -> bool {
        matches!(self, Self::Declared(_))
    }
}

impl<E: DeclaredError> From<E> for HandlerError {
    fn from(error: E) -> Self {
        Self::Declared(error.to_wire())
    }
}

impl From<RpcError> for HandlerError {
    fn from(error: RpcError) -> Self {
        Self::Fault(Box::new(error))
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declared(wire) => write!(f, "declared error {}", wire),
            Self::Fault(e) => write!(f, "handler fault: {}", e),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fault(e) => Some(&**e),
            Self::Declared(_) => None,
        }
    }
}

type Constructor = fn(String) -> BoxError;

fn construct<E: DeclaredError>(message: String) -> BoxError {
    Box::new(E::from_message(message))
}

/// Class name -> constructor table used to rebuild received errors.
///
/// [`ServiceError`] is always registered.
#[derive(Clone)]
pub struct ErrorRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl ErrorRegistry {
    /// Registry knowing only [`ServiceError`]
    pub fn new() -> Self {
        let mut registry = Self {
            constructors: HashMap::new(),
        };
        registry.register::<ServiceError>();
        registry
    }

    /// Register `E` under its class name (replacing any previous entry).
    pub fn register<E: DeclaredError>(&mut self) -> &mut Self {
        if self.constructors.insert(E::CLASS, construct::<E>).is_some() {
            log::debug!("error class {} registered twice", E::CLASS);
        }
        self
    }

    /// Builder-style [`ErrorRegistry::register`]
    pub fn with<E: DeclaredError>(mut self) -> Self {
        self.register::<E>();
        self
    }

    /// Check if a class name is known
    pub fn contains(&self, class: &str) -> bool {
        self.constructors.contains_key(class)
    }

    /// Rebuild a received error; `None` if its class is not registered.
    pub fn reconstruct(&self, wire: &WireError) -> Option<BoxError> {
        self.constructors
            .get(wire.class.as_str())
            .map(|construct| construct(wire.message.clone()))
    }
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<_> = self.constructors.keys().collect();
        classes.sort();
        f.debug_struct("ErrorRegistry")
            .field("classes", &classes)
            .finish()
    }
}

/// Why a reply's result is not a payload.
#[derive(Debug)]
pub enum ReplyError {
    /// The remote method failed with a declared error, rebuilt locally
    Remote(BoxError),

    /// The error reply names a class this side cannot rebuild
    UnknownClass(WireError),
}

impl ReplyError {
    /// Downcast a rebuilt remote error
    pub fn downcast_ref<E: DeclaredError>(&self) -> Option<&E> {
        match self {
            Self::Remote(e) => e.downcast_ref::<E>(),
            Self::UnknownClass(_) => None,
        }
    }
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(e) => write!(f, "remote error: {}", e),
            Self::UnknownClass(wire) => write!(f, "unknown remote error class {}", wire),
        }
    }
}

impl std::error::Error for ReplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Remote(e) => Some(&**e),
            Self::UnknownClass(_) => None,
        }
    }
}
