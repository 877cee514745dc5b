// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # subrpc - Request/Reply RPC over publish/subscribe
//!
//! Services export named methods; callers invoke a method on one specific
//! peer, on every peer serving the service (collecting many replies), or
//! broadcast a one-way message. Correlation, timeouts and at-most-one
//! delivery for unicast calls are handled here; the messaging substrate
//! only needs to publish and subscribe on subjects.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use subrpc::{CallOptions, Client, MemoryTransport, PeerContext, RpcConfig, Server, Service};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(MemoryTransport::new());
//! let context = PeerContext::new(transport, RpcConfig::new().with_peer_name("app"))?;
//!
//! let math = Arc::new(
//!     Service::builder("Math")
//!         .export("ping", |request: subrpc::ServerRequest| {
//!             request.reply("pong")?;
//!             Ok(())
//!         })
//!         .build()?,
//! );
//! let _server = Server::new(&context, math.clone())?;
//! let client = Client::new(&context, math.descriptor().clone())?;
//!
//! let replies = client
//!     .mcall("ping", (), CallOptions::new().with_timeout(Duration::from_millis(100)))?
//!     .execute()?
//!     .collect_replies()
//!     .await;
//! assert_eq!(replies.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |   Client (Call / Mcall / Mcast)      Server (dispatch, reply)  |
//! +---------------------------------------------------------------+
//! |   Service registry | Declared errors | Pending-request table   |
//! +---------------------------------------------------------------+
//! |   Peer: identity, subjects, codec, publish/subscribe           |
//! +---------------------------------------------------------------+
//! |   Transport: publish(subject, bytes), subscribe, unsubscribe   |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PeerContext`] | Transport, codec, config and peer id counters |
//! | [`Service`] | Exported methods and their handlers |
//! | [`Server`] | Hosts services on a server peer |
//! | [`Client`] | Builds requests and routes replies |
//! | [`PendingRequest`] | Event stream of an executed Call or Mcall |

/// Protocol constants and runtime configuration.
pub mod config;
/// Wire codec (mapping <-> bytes).
pub mod codec;
/// RPC error types.
pub mod error;
/// Peer identity and transport plumbing.
pub mod peer;
/// Exported methods, service descriptors and dispatch.
pub mod registry;
/// Declared service errors and their reconstruction.
pub mod service;
/// Subject naming.
pub mod subject;
/// One-shot timers.
pub mod timer;
/// Publish/subscribe substrate.
pub mod transport;
/// Wire envelopes.
pub mod types;

mod client;
mod server;

pub use client::{
    Call, CallOptions, Client, Deadline, Mcall, Mcast, PendingRequest, Reply, RequestEvent,
    RequestHandle,
};
pub use config::RpcConfig;
pub use error::{RpcError, RpcResult};
pub use peer::{Peer, PeerContext, PeerKind};
pub use registry::{Method, MethodHandler, MethodOptions, Service, ServiceBuilder, ServiceDescriptor};
pub use server::{Server, ServerRequest};
pub use service::{DeclaredError, ErrorRegistry, HandlerError, ReplyError, ServiceError};
pub use transport::{MemoryTransport, Transport};
pub use types::{MessageId, WireError};

#[cfg(test)]
mod tests;
