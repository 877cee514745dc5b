// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service registry: exported methods and their handlers.
//!
//! A [`Service`] is built once with [`ServiceBuilder`] and is immutable
//! afterwards. Clients only need its [`ServiceDescriptor`] (method names
//! and per-method options); servers also use its handler table.
//!
//! # Example
//!
//! ```rust
//! use subrpc::registry::{MethodOptions, Service};
//! use std::time::Duration;
//!
//! let math = Service::builder("Math")
//!     .export("ping", |request: subrpc::ServerRequest| {
//!         request.reply("pong")?;
//!         Ok(())
//!     })
//!     .export_with(
//!         "slow",
//!         MethodOptions::default().with_timeout(Duration::from_millis(50)),
//!         |_request: subrpc::ServerRequest| Ok(()),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert!(math.descriptor().method("ping").is_some());
//! ```

use crate::config::validate_token;
use crate::error::{RpcError, RpcResult};
use crate::server::ServerRequest;
use crate::service::{HandlerError, ServiceError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Options declared for a method at export time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodOptions {
    /// Default timeout for requests to this method
    pub timeout: Option<Duration>,
}

impl MethodOptions {
    /// Set the default timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// An exported method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    name: String,
    options: MethodOptions,
}

impl Method {
    /// Method name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared options
    pub fn options(&self) -> &MethodOptions {
        &self.options
    }
}

/// Service name plus the methods it exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    methods: HashMap<String, Method>,
}

impl ServiceDescriptor {
    /// Service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an exported method
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Check if a method is exported
    pub fn exports(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Exported method names, sorted
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Handler for one exported method.
///
/// The handler answers through `request.reply(..)` (now or later, from a
/// spawned task) or by returning a declared error. Returning
/// [`HandlerError::Fault`] marks a bug in the service and is never sent
/// to the caller.
pub trait MethodHandler: Send + Sync + 'static {
    /// Handle one request
    fn handle(&self, request: ServerRequest) -> Result<(), HandlerError>;
}

/// A function-based method handler.
impl<F> MethodHandler for F
where
    F: Fn(ServerRequest) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, request: ServerRequest) -> Result<(), HandlerError> {
        self(request)
    }
}

/// A service implementation: descriptor plus method handlers.
pub struct Service {
    descriptor: Arc<ServiceDescriptor>,
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl Service {
    /// Start defining a service
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            methods: HashMap::new(),
            handlers: HashMap::new(),
            duplicates: Vec::new(),
        }
    }

    /// Service name
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Descriptor to share with clients
    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    /// Run the handler for `request.method()`.
    ///
    /// A method that is not exported fails with a [`ServiceError`], which
    /// the server sends back like any other declared error.
    pub fn dispatch(&self, request: ServerRequest) -> Result<(), HandlerError> {
        match self.handlers.get(request.method()) {
            Some(handler) => handler.handle(request),
            None => Err(ServiceError::new(format!(
                "undefined service method `{}' on {}",
                request.method(),
                self.name()
            ))
            .into()),
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.descriptor.name)
            .field("methods", &self.descriptor.method_names())
            .finish()
    }
}

/// Builder for [`Service`].
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, Method>,
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    duplicates: Vec<String>,
}

impl ServiceBuilder {
    /// Export `name` with default options.
    pub fn export<F>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ServerRequest) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.export_handler(name, MethodOptions::default(), handler)
    }

    /// Export `name` with declared options.
    pub fn export_with<F>(self, name: impl Into<String>, options: MethodOptions, handler: F) -> Self
    where
        F: Fn(ServerRequest) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.export_handler(name, options, handler)
    }

    /// Export `name` served by a [`MethodHandler`] implementation.
    pub fn export_handler<H: MethodHandler>(
        mut self,
        name: impl Into<String>,
        options: MethodOptions,
        handler: H,
    ) -> Self {
        let name = name.into();
        if self.methods.contains_key(&name) {
            self.duplicates.push(name.clone());
        }
        self.methods.insert(
            name.clone(),
            Method {
                name: name.clone(),
                options,
            },
        );
        self.handlers.insert(name, Arc::new(handler));
        self
    }

    /// Finish the service.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::InvalidConfig` if the service name cannot be used
    /// in a subject, a method name is empty, a method is exported twice, or
    /// a method declares a zero timeout.
    pub fn build(self) -> RpcResult<Service> {
        validate_token("service name", &self.name)?;

        if let Some(name) = self.duplicates.first() {
            return Err(RpcError::InvalidConfig(format!(
                "method `{}' exported twice on {}",
                name, self.name
            )));
        }
        for method in self.methods.values() {
            if method.name.is_empty() {
                return Err(RpcError::InvalidConfig(format!(
                    "empty method name on {}",
                    self.name
                )));
            }
            if method.options.timeout.is_some_and(|t| t.is_zero()) {
                return Err(RpcError::InvalidConfig(format!(
                    "method `{}' on {} declares a zero timeout",
                    method.name, self.name
                )));
            }
        }

        Ok(Service {
            descriptor: Arc::new(ServiceDescriptor {
                name: self.name,
                methods: self.methods,
            }),
            handlers: self.handlers,
        })
    }
}
