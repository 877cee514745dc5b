// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC Server (Replier) implementation.
//!
//! A [`Server`] hosts one or more services. For each service it subscribes
//! to the direct call subject of its own peer id plus the service's mcall
//! and mcast subjects, and runs every inbound request through the
//! service's handler table.

use crate::codec::{self, MessageMap};
use crate::error::{RpcError, RpcResult};
use crate::peer::{Peer, PeerContext, PeerKind};
use crate::registry::Service;
use crate::service::{DeclaredError, HandlerError};
use crate::transport::SubscriptionId;
use crate::types::{MessageId, ReplyMessage, RequestMessage, WireError};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Server-side view of one inbound request.
///
/// Cheap to clone; a handler may move a clone into a spawned task and
/// reply later.
#[derive(Clone)]
pub struct ServerRequest {
    peer: Arc<Peer>,
    service: Arc<str>,
    message: Arc<RequestMessage>,
}

impl ServerRequest {
    fn new(peer: Arc<Peer>, service: Arc<str>, message: RequestMessage) -> Self {
        Self {
            peer,
            service,
            message: Arc::new(message),
        }
    }

    /// Id assigned by the requesting client
    pub fn message_id(&self) -> MessageId {
        self.message.message_id
    }

    /// Id of the requesting peer, or its name when it sent no id
    pub fn peer_id(&self) -> &str {
        self.message.sender()
    }

    /// Name of the requesting peer, if it sent one
    pub fn peer_name(&self) -> Option<&str> {
        self.message.peername.as_deref()
    }

    /// Reply subject (absent on mcast)
    pub fn reply_to(&self) -> Option<&str> {
        self.message.reply_to.as_deref()
    }

    /// Whether the caller listens for replies
    pub fn expects_reply(&self) -> bool {
        self.message.reply_to.is_some()
    }

    /// Requested method
    pub fn method(&self) -> &str {
        &self.message.method
    }

    /// Name of the service handling the request
    pub fn service_name(&self) -> &str {
        &self.service
    }

    /// Raw request payload
    pub fn payload(&self) -> &Value {
        &self.message.payload
    }

    /// Deserialize the payload.
    pub fn payload_as<T: DeserializeOwned>(&self) -> RpcResult<T> {
        serde_json::from_value(self.message.payload.clone())
            .map_err(|e| RpcError::Decode(format!("{} payload: {}", self.method(), e)))
    }

    /// Id of the serving peer
    pub fn server_id(&self) -> &str {
        self.peer.peer_id()
    }

    /// Send a successful reply.
    ///
    /// May be called more than once; a unicast caller only ever sees the
    /// first reply.
    ///
    /// # Errors
    ///
    /// `RpcError::NoReplyPath` on an mcast request, or the transport error.
    pub fn reply<T: Serialize>(&self, payload: T) -> RpcResult<()> {
        let reply_to = self.reply_to().ok_or(RpcError::NoReplyPath)?;
        let reply = ReplyMessage::success(
            self.message_id(),
            self.peer.peer_id(),
            codec::to_payload(payload)?,
        )
        .with_peername(self.peer.peer_name());

        log::debug!(
            "{}: reply to {} #{} on {}",
            self.peer.peer_id(),
            self.peer_id(),
            self.message_id(),
            reply_to
        );
        self.peer.publish(reply_to, &reply)
    }

    /// Send a declared error as the reply.
    pub fn reply_error<E: DeclaredError>(&self, error: E) -> RpcResult<()> {
        self.send_error(error.to_wire())
    }

    fn send_error(&self, error: WireError) -> RpcResult<()> {
        let reply_to = self.reply_to().ok_or(RpcError::NoReplyPath)?;
        log::debug!(
            "{}: error reply to {} #{}: {}",
            self.peer.peer_id(),
            self.peer_id(),
            self.message_id(),
            error
        );
        let reply = ReplyMessage::error(self.message_id(), self.peer.peer_id(), error)
            .with_peername(self.peer.peer_name());
        self.peer.publish(reply_to, &reply)
    }
}

impl std::fmt::Debug for ServerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRequest")
            .field("service", &self.service)
            .field("message", &self.message)
            .finish()
    }
}

struct HostedService {
    service: Arc<Service>,
    name: Arc<str>,
    base: String,
    subscriptions: Vec<SubscriptionId>,
}

struct ServerInner {
    peer: Arc<Peer>,

    /// Service name -> hosted service
    services: RwLock<HashMap<String, HostedService>>,

    shutdown: AtomicBool,

    /// Statistics
    requests_processed: AtomicU64,
    faults: AtomicU64,
}

impl ServerInner {
    fn dispatch(&self, service_name: &str, message: MessageMap) -> RpcResult<()> {
        let (service, name) = match self.services.read().get(service_name) {
            Some(hosted) => (hosted.service.clone(), hosted.name.clone()),
            None => {
                log::debug!(
                    "{}: {} is not hosted, dropping request",
                    self.peer.peer_id(),
                    service_name
                );
                return Ok(());
            }
        };

        let message: RequestMessage = codec::from_map(message)?;
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "{}: {}.{} #{} from {}",
            self.peer.peer_id(),
            name,
            message.method,
            message.message_id,
            message.sender()
        );

        let request = ServerRequest::new(self.peer.clone(), name, message);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| service.dispatch(request.clone())))
            .unwrap_or_else(|payload| {
                Err(HandlerError::fault(panic_message(payload.as_ref())))
            });
        match outcome {
            Ok(()) => Ok(()),
            Err(HandlerError::Declared(error)) => {
                if request.expects_reply() {
                    request.send_error(error)
                } else {
                    log::debug!(
                        "{}: {} on mcast {} not replied",
                        self.peer.peer_id(),
                        error,
                        request.method()
                    );
                    Ok(())
                }
            }
            Err(HandlerError::Fault(source)) => {
                self.faults.fetch_add(1, Ordering::Relaxed);
                Err(RpcError::HandlerFault {
                    service: request.service_name().to_string(),
                    method: request.method().to_string(),
                    source,
                })
            }
        }
    }

    fn handle_inbound(&self, service_name: &str, message: MessageMap) {
        match self.dispatch(service_name, message) {
            Ok(()) => {}
            Err(e @ RpcError::HandlerFault { .. }) => {
                log::error!("{}: {}", self.peer.peer_id(), e);
            }
            Err(e) => {
                log::warn!(
                    "{}: failed to process request for {}: {}",
                    self.peer.peer_id(),
                    service_name,
                    e
                );
            }
        }
    }

    fn release(&self, hosted: HostedService) -> RpcResult<()> {
        let mut result = Ok(());
        for id in hosted.subscriptions {
            if let Err(e) = self.peer.unsubscribe(id) {
                log::warn!("{}: failed to unsubscribe {}: {}", self.peer.peer_id(), id, e);
                result = Err(e);
            }
        }
        log::info!("Server {} stopped service {}", self.peer.peer_id(), hosted.name);
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload");
    format!("handler panicked: {}", detail)
}

/// RPC Server for hosting services.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use subrpc::{MemoryTransport, PeerContext, RpcConfig, Server, Service};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = Arc::new(MemoryTransport::new());
/// let context = PeerContext::new(transport, RpcConfig::new().with_peer_name("node"))?;
///
/// let echo = Service::builder("Echo")
///     .export("echo", |request: subrpc::ServerRequest| {
///         request.reply(request.payload())?;
///         Ok(())
///     })
///     .build()?;
///
/// let server = Server::new(&context, Arc::new(echo))?;
/// assert_eq!(server.services(), vec!["Echo".to_string()]);
/// # Ok(())
/// # }
/// ```
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Create a server peer and start hosting `service`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(context: &Arc<PeerContext>, service: Arc<Service>) -> RpcResult<Self> {
        let server = Self::empty(context);
        server.start(service)?;
        Ok(server)
    }

    /// Create a server peer hosting nothing yet.
    pub fn empty(context: &Arc<PeerContext>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                peer: Arc::new(Peer::new(context, PeerKind::Server)),
                services: RwLock::new(HashMap::new()),
                shutdown: AtomicBool::new(false),
                requests_processed: AtomicU64::new(0),
                faults: AtomicU64::new(0),
            }),
        }
    }

    /// Start hosting `service`.
    ///
    /// # Errors
    ///
    /// - `RpcError::InvalidConfig` if a service with the same name, or
    ///   one mapped to the same subject namespace, is already hosted
    /// - `RpcError::Shutdown` after [`Server::shutdown`]
    /// - the transport error if a subscription fails
    pub fn start(&self, service: Arc<Service>) -> RpcResult<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(RpcError::Shutdown);
        }

        let peer = &self.inner.peer;
        let name: Arc<str> = Arc::from(service.name());
        let subjects = peer.subjects_for(&name);

        let mut services = self.inner.services.write();
        if services.contains_key(&*name) {
            return Err(RpcError::InvalidConfig(format!(
                "service {} is already hosted by {}",
                name,
                peer.peer_id()
            )));
        }
        if let Some(other) = services.values().find(|h| h.base == subjects.base()) {
            return Err(RpcError::InvalidConfig(format!(
                "namespace {} is already used by service {}",
                subjects.base(),
                other.name
            )));
        }

        let topics = [
            subjects.call(peer.peer_id()),
            subjects.mcall(),
            subjects.mcast(),
        ];
        let mut subscriptions = Vec::with_capacity(topics.len());
        for topic in &topics {
            let weak: Weak<ServerInner> = Arc::downgrade(&self.inner);
            let service_name = name.clone();
            let subscribed = peer.subscribe(topic, move |message| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_inbound(&service_name, message);
                }
            });

            match subscribed {
                Ok(id) => subscriptions.push(id),
                Err(e) => {
                    for id in subscriptions {
                        let _ = peer.unsubscribe(id);
                    }
                    return Err(e);
                }
            }
        }

        log::info!("Server {} started service {}", peer.peer_id(), name);
        log::info!("  Call subject: {}", topics[0]);
        log::info!("  Mcall subject: {}", topics[1]);
        log::info!("  Mcast subject: {}", topics[2]);

        services.insert(
            name.to_string(),
            HostedService {
                service,
                name,
                base: subjects.base().to_string(),
                subscriptions,
            },
        );
        Ok(())
    }

    /// Stop hosting a service. Returns `false` if it was not hosted.
    pub fn stop(&self, service_name: &str) -> RpcResult<bool> {
        let Some(hosted) = self.inner.services.write().remove(service_name) else {
            return Ok(false);
        };
        self.inner.release(hosted)?;
        Ok(true)
    }

    /// Names of the hosted services, sorted
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.services.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Run one decoded request through the named service.
    ///
    /// This is what the subscriptions do for every inbound message. A
    /// declared error is sent to the caller and yields `Ok`. An undeclared
    /// one is returned as `RpcError::HandlerFault` and nothing is sent.
    pub fn dispatch(&self, service_name: &str, message: MessageMap) -> RpcResult<()> {
        self.inner.dispatch(service_name, message)
    }

    /// Id of the server peer
    pub fn peer_id(&self) -> &str {
        self.inner.peer.peer_id()
    }

    /// Name of the server peer
    pub fn peer_name(&self) -> &str {
        self.inner.peer.peer_name()
    }

    /// Get the number of requests processed
    pub fn requests_processed(&self) -> u64 {
        self.inner.requests_processed.load(Ordering::Relaxed)
    }

    /// Get the number of handler faults
    pub fn faults(&self) -> u64 {
        self.inner.faults.load(Ordering::Relaxed)
    }

    /// Stop every service. Further [`Server::start`] calls fail.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let hosted: Vec<_> = self.inner.services.write().drain().map(|(_, h)| h).collect();
        for service in hosted {
            let _ = self.inner.release(service);
        }
    }

    /// Check if the server was shut down
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("peer_id", &self.peer_id())
            .field("services", &self.services())
            .finish()
    }
}
