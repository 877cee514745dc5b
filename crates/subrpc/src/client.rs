// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC Client (Requester) implementation.
//!
//! A [`Client`] builds requests for one service and tracks the ones that
//! expect replies. It subscribes once to its inbox subject and routes each
//! reply to the pending request with the same message id.
//!
//! # Request variants
//!
//! | Variant | Subject | Replies delivered | Ends on |
//! |---------|---------|-------------------|---------|
//! | [`Call`] | `rpc.<svc>.call.<peer-id>` | at most one | first reply, timeout, stop |
//! | [`Mcall`] | `rpc.<svc>.mcall` | zero or more | timeout, stop, `max_replies` |
//! | [`Mcast`] | `rpc.<svc>.mcast` | none | never registered |
//!
//! # Outcomes
//!
//! An executed Call or Mcall yields a [`PendingRequest`]: a stream of
//! [`RequestEvent`]s that ends once the request is unregistered. A timeout
//! is delivered as [`RequestEvent::Timeout`], at most once, and only while
//! the request is still registered.

use crate::codec::{self, MessageMap};
use crate::error::{RpcError, RpcResult};
use crate::peer::{Peer, PeerContext, PeerKind};
use crate::registry::{Method, ServiceDescriptor};
use crate::service::{ErrorRegistry, ReplyError};
use crate::subject::Subjects;
use crate::timer::{self, TimerHandle};
use crate::transport::SubscriptionId;
use crate::types::{MessageId, ReplyMessage, RequestMessage, WireError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

/// When a request stops waiting for replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Time out after this long
    After(Duration),
    /// Never time out; the request lives until stopped
    Never,
}

/// Per-request options.
///
/// Unset fields fall back to the method's declared options, then to the
/// client's configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Timeout override
    pub timeout: Option<Deadline>,
    /// Unregister after this many replies (Mcall only; Call is always 1)
    pub max_replies: Option<usize>,
}

impl CallOptions {
    /// Options with nothing overridden
    pub fn new() -> Self {
        Self::default()
    }

    /// Time out after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Deadline::After(timeout));
        self
    }

    /// Never time out.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = Some(Deadline::Never);
        self
    }

    /// Stop after `count` replies.
    pub fn with_max_replies(mut self, count: usize) -> Self {
        self.max_replies = Some(count);
        self
    }

    fn validate(&self) -> RpcResult<()> {
        if self.max_replies == Some(0) {
            return Err(RpcError::InvalidConfig(
                "max_replies must be at least 1".to_string(),
            ));
        }
        if let Some(Deadline::After(timeout)) = self.timeout {
            if timeout.is_zero() {
                return Err(RpcError::InvalidConfig(
                    "request timeout must be non-zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Event delivered to a pending request.
#[derive(Debug)]
pub enum RequestEvent {
    /// A reply arrived
    Reply(Reply),
    /// The deadline elapsed while the request was still registered
    Timeout,
}

/// A reply as seen by the requesting client.
#[derive(Debug, Clone)]
pub struct Reply {
    message_id: MessageId,
    peer_id: String,
    peer_name: Option<String>,
    body: Result<Value, WireError>,
    errors: Arc<ErrorRegistry>,
}

impl Reply {
    fn new(mut message: ReplyMessage, errors: Arc<ErrorRegistry>) -> Self {
        Self {
            message_id: message.message_id,
            peer_id: std::mem::take(&mut message.peer_id),
            peer_name: message.peername.take(),
            body: message.into_body(),
            errors,
        }
    }

    /// Id of the request this reply answers
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Id of the replying peer
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Name of the replying peer, if it sent one
    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    /// Check if the remote method failed
    pub fn is_error(&self) -> bool {
        self.body.is_err()
    }

    /// Payload of a successful reply
    pub fn payload(&self) -> Option<&Value> {
        self.body.as_ref().ok()
    }

    /// Error envelope of a failed reply
    pub fn error(&self) -> Option<&WireError> {
        self.body.as_ref().err()
    }

    /// Payload, or the remote error rebuilt through the client's
    /// [`ErrorRegistry`].
    pub fn result(&self) -> Result<Value, ReplyError> {
        match &self.body {
            Ok(payload) => Ok(payload.clone()),
            Err(wire) => match self.errors.reconstruct(wire) {
                Some(error) => Err(ReplyError::Remote(error)),
                None => Err(ReplyError::UnknownClass(wire.clone())),
            },
        }
    }

    /// Deserialize the payload of a successful reply.
    ///
    /// # Errors
    ///
    /// `RpcError::Decode` if the reply is an error reply or the payload
    /// does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> RpcResult<T> {
        match &self.body {
            Ok(payload) => serde_json::from_value(payload.clone())
                .map_err(|e| RpcError::Decode(e.to_string())),
            Err(wire) => Err(RpcError::Decode(format!("error reply: {}", wire))),
        }
    }
}

/// Registry entry of a request that expects replies.
struct PendingEntry {
    events: mpsc::UnboundedSender<RequestEvent>,
    timer: Option<TimerHandle>,
    max_replies: Option<usize>,
    delivered: usize,
}

impl PendingEntry {
    fn cancel_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
    }
}

struct ClientInner {
    peer: Peer,
    service: Arc<ServiceDescriptor>,
    subjects: Subjects,
    inbox: String,
    errors: Arc<ErrorRegistry>,
    default_timeout: Duration,

    /// Requests waiting for replies
    pending: DashMap<MessageId, PendingEntry>,

    inbox_subscription: Mutex<Option<SubscriptionId>>,
    shutdown: AtomicBool,
}

/// Message ids are drawn process-wide: clients sharing a peer name share
/// an inbox, and replies are routed by message id alone.
static MESSAGE_IDS: AtomicU64 = AtomicU64::new(1);

impl ClientInner {
    fn next_message_id(&self) -> MessageId {
        MessageId(MESSAGE_IDS.fetch_add(1, Ordering::Relaxed))
    }

    fn lookup(&self, method: &str) -> RpcResult<&Method> {
        self.service
            .method(method)
            .ok_or_else(|| RpcError::undefined_method(self.service.name(), method))
    }

    /// Caller override > method default > configured default.
    fn effective_timeout(&self, method: &Method, options: &CallOptions) -> Option<Duration> {
        match options.timeout {
            Some(Deadline::After(timeout)) => Some(timeout),
            Some(Deadline::Never) => None,
            None => Some(method.options().timeout.unwrap_or(self.default_timeout)),
        }
    }

    fn ensure_running(&self) -> RpcResult<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RpcError::Shutdown);
        }
        Ok(())
    }

    fn request(
        &self,
        message_id: MessageId,
        method: String,
        payload: Value,
        reply: bool,
    ) -> RequestMessage {
        RequestMessage {
            message_id,
            peer_id: self.peer.peer_id().to_string(),
            peername: Some(self.peer.peer_name().to_string()),
            method,
            payload,
            reply_to: reply.then(|| self.inbox.clone()),
        }
    }

    /// Add a registry entry, then arm its timer.
    fn register(
        self: &Arc<Self>,
        message_id: MessageId,
        max_replies: Option<usize>,
        timeout: Option<Duration>,
    ) -> mpsc::UnboundedReceiver<RequestEvent> {
        let (events, receiver) = mpsc::unbounded_channel();
        self.pending.insert(
            message_id,
            PendingEntry {
                events,
                timer: None,
                max_replies,
                delivered: 0,
            },
        );

        if let Some(timeout) = timeout {
            let weak = Arc::downgrade(self);
            let timer = timer::after(timeout, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.expire(message_id);
                }
            });
            match self.pending.get_mut(&message_id) {
                Some(mut entry) => entry.timer = Some(timer),
                // Already gone: stopped or expired in the meantime
                None => timer.cancel(),
            }
        }
        receiver
    }

    fn unregister(&self, message_id: MessageId) -> bool {
        match self.pending.remove(&message_id) {
            Some((_, entry)) => {
                entry.cancel_timer();
                log::debug!("{}: request {} unregistered", self.peer.peer_id(), message_id);
                true
            }
            None => false,
        }
    }

    fn expire(&self, message_id: MessageId) {
        if let Some((_, entry)) = self.pending.remove(&message_id) {
            log::debug!("{}: request {} timed out", self.peer.peer_id(), message_id);
            let _ = entry.events.send(RequestEvent::Timeout);
        }
    }

    fn route_reply(&self, message: MessageMap) {
        let message: ReplyMessage = match codec::from_map(message) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("{}: dropping malformed reply: {}", self.peer.peer_id(), e);
                return;
            }
        };

        let message_id = message.message_id;
        let Entry::Occupied(mut entry) = self.pending.entry(message_id) else {
            log::debug!(
                "{}: dropping reply {} from {} (not pending)",
                self.peer.peer_id(),
                message_id,
                message.peer_id
            );
            return;
        };

        // Delivery and removal happen under the entry lock, so a reply and
        // the timeout can never both reach the caller.
        let reply = Reply::new(message, self.errors.clone());
        let pending = entry.get_mut();
        pending.delivered += 1;
        let delivered = pending.events.send(RequestEvent::Reply(reply)).is_ok();
        let done = pending.max_replies.is_some_and(|max| pending.delivered >= max);

        if done || !delivered {
            let (_, pending) = entry.remove_entry();
            pending.cancel_timer();
        }
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(id) = self.inbox_subscription.lock().take() {
            if let Err(e) = self.peer.unsubscribe(id) {
                log::warn!("{}: failed to unsubscribe inbox: {}", self.peer.peer_id(), e);
            }
        }
        self.pending.retain(|_, entry| {
            entry.cancel_timer();
            false
        });
        log::debug!("{}: client shut down", self.peer.peer_id());
    }
}

/// Fields shared by the reply-expecting variants.
struct Prepared {
    client: Arc<ClientInner>,
    message_id: MessageId,
    method: String,
    payload: Value,
    timeout: Option<Duration>,
    max_replies: Option<usize>,
}

impl Prepared {
    fn execute(self, subject: String) -> RpcResult<PendingRequest> {
        let client = self.client;
        client.ensure_running()?;

        let message_id = self.message_id;
        let request = client.request(message_id, self.method, self.payload, true);

        // Registered before publishing so an immediate reply finds its entry
        let events = client.register(message_id, self.max_replies, self.timeout);
        if let Err(e) = client.peer.publish(&subject, &request) {
            client.unregister(message_id);
            return Err(e);
        }
        log::debug!(
            "{}: {} #{} sent on {}",
            client.peer.peer_id(),
            request.method,
            message_id,
            subject
        );

        Ok(PendingRequest {
            handle: RequestHandle {
                message_id,
                client: Arc::downgrade(&client),
            },
            events,
        })
    }
}

/// Unicast request to one peer. Delivers at most one reply.
pub struct Call {
    prepared: Prepared,
    peer_id: String,
}

impl Call {
    /// Id assigned to this request
    pub fn message_id(&self) -> MessageId {
        self.prepared.message_id
    }

    /// Target peer
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Effective timeout (`None`: never)
    pub fn timeout(&self) -> Option<Duration> {
        self.prepared.timeout
    }

    /// Publish, register and arm the timer.
    pub fn execute(self) -> RpcResult<PendingRequest> {
        let subject = self.prepared.client.subjects.call(&self.peer_id);
        self.prepared.execute(subject)
    }

    /// Execute and feed every outcome to `callback` (`None` on timeout).
    pub fn shortcut<F>(self, callback: F) -> RpcResult<RequestHandle>
    where
        F: FnMut(&RequestHandle, Option<Reply>) + Send + 'static,
    {
        Ok(self.execute()?.shortcut(callback))
    }
}

/// Multicast request to every peer serving the service.
pub struct Mcall {
    prepared: Prepared,
}

impl Mcall {
    /// Id assigned to this request
    pub fn message_id(&self) -> MessageId {
        self.prepared.message_id
    }

    /// Effective timeout (`None`: never)
    pub fn timeout(&self) -> Option<Duration> {
        self.prepared.timeout
    }

    /// Publish, register and arm the timer.
    pub fn execute(self) -> RpcResult<PendingRequest> {
        let subject = self.prepared.client.subjects.mcall();
        self.prepared.execute(subject)
    }

    /// Execute and feed every outcome to `callback` (`None` on timeout).
    pub fn shortcut<F>(self, callback: F) -> RpcResult<RequestHandle>
    where
        F: FnMut(&RequestHandle, Option<Reply>) + Send + 'static,
    {
        Ok(self.execute()?.shortcut(callback))
    }
}

/// Multicast request without a reply path.
pub struct Mcast {
    client: Arc<ClientInner>,
    message_id: MessageId,
    method: String,
    payload: Value,
}

impl Mcast {
    /// Id assigned to this request
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Publish. Nothing is registered and no timer is started.
    pub fn execute(self) -> RpcResult<MessageId> {
        let client = self.client;
        client.ensure_running()?;

        let request = client.request(self.message_id, self.method, self.payload, false);
        let subject = client.subjects.mcast();
        client.peer.publish(&subject, &request)?;
        log::debug!(
            "{}: {} #{} cast on {}",
            client.peer.peer_id(),
            request.method,
            self.message_id,
            subject
        );
        Ok(self.message_id)
    }
}

/// Cancellation handle of an executed request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    message_id: MessageId,
    client: Weak<ClientInner>,
}

impl RequestHandle {
    /// Id of the request
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Unregister the request: no further reply or timeout is delivered.
    ///
    /// Idempotent. Returns whether the request was still registered.
    pub fn stop(&self) -> bool {
        self.client
            .upgrade()
            .is_some_and(|client| client.unregister(self.message_id))
    }

    /// Check if the request still accepts replies
    pub fn is_registered(&self) -> bool {
        self.client
            .upgrade()
            .is_some_and(|client| client.pending.contains_key(&self.message_id))
    }
}

/// An executed Call or Mcall.
///
/// Events already queued stay readable after the request is unregistered;
/// after them the stream ends.
#[derive(Debug)]
pub struct PendingRequest {
    handle: RequestHandle,
    events: mpsc::UnboundedReceiver<RequestEvent>,
}

impl PendingRequest {
    /// Id of the request
    pub fn message_id(&self) -> MessageId {
        self.handle.message_id
    }

    /// Cancellation handle
    pub fn handle(&self) -> RequestHandle {
        self.handle.clone()
    }

    /// Wait for the next event; `None` once the request is finished.
    pub async fn next_event(&mut self) -> Option<RequestEvent> {
        self.events.recv().await
    }

    /// Next event if one is queued
    pub fn try_next_event(&mut self) -> Option<RequestEvent> {
        self.events.try_recv().ok()
    }

    /// See [`RequestHandle::stop`].
    pub fn stop(&self) -> bool {
        self.handle.stop()
    }

    /// Wait for the first reply, then stop the request.
    ///
    /// `None` on timeout.
    pub async fn first_reply(mut self) -> Option<Reply> {
        match self.next_event().await {
            Some(RequestEvent::Reply(reply)) => {
                self.stop();
                Some(reply)
            }
            Some(RequestEvent::Timeout) | None => None,
        }
    }

    /// Collect every reply until the request finishes.
    ///
    /// Does not return for a request without deadline or reply cap until
    /// it is stopped through a [`RequestHandle`].
    pub async fn collect_replies(mut self) -> Vec<Reply> {
        let mut replies = Vec::new();
        while let Some(event) = self.next_event().await {
            if let RequestEvent::Reply(reply) = event {
                replies.push(reply);
            }
        }
        replies
    }

    /// Feed every event to `callback` from a spawned task (`None` on timeout).
    pub fn shortcut<F>(mut self, mut callback: F) -> RequestHandle
    where
        F: FnMut(&RequestHandle, Option<Reply>) + Send + 'static,
    {
        let handle = self.handle();
        let task_handle = handle.clone();
        tokio::spawn(async move {
            while let Some(event) = self.next_event().await {
                match event {
                    RequestEvent::Reply(reply) => callback(&task_handle, Some(reply)),
                    RequestEvent::Timeout => callback(&task_handle, None),
                }
            }
        });
        handle
    }
}

/// RPC Client for one service.
///
/// Dropping the client shuts it down: its inbox is released and every
/// pending request stream ends.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use std::sync::Arc;
/// use subrpc::{CallOptions, Client, MemoryTransport, PeerContext, RpcConfig, Server, Service};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = Arc::new(MemoryTransport::new());
/// let context = PeerContext::new(transport, RpcConfig::new().with_peer_name("node"))?;
///
/// let echo = Arc::new(
///     Service::builder("Echo")
///         .export("echo", |request: subrpc::ServerRequest| {
///             request.reply(request.payload())?;
///             Ok(())
///         })
///         .build()?,
/// );
/// let server = Server::new(&context, echo.clone())?;
/// let client = Client::new(&context, echo.descriptor().clone())?;
///
/// let reply = client
///     .call(server.peer_id(), "echo", "hi", CallOptions::new())?
///     .execute()?
///     .first_reply()
///     .await
///     .expect("echo replies");
/// assert_eq!(reply.payload(), Some(&json!("hi")));
/// assert_eq!(reply.peer_id(), server.peer_id());
/// # Ok(())
/// # }
/// ```
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client peer for `service`, rebuilding only [`ServiceError`]
    /// from error replies.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// [`ServiceError`]: crate::service::ServiceError
    pub fn new(context: &Arc<PeerContext>, service: Arc<ServiceDescriptor>) -> RpcResult<Self> {
        Self::with_errors(context, service, ErrorRegistry::new())
    }

    /// Create a client peer that rebuilds the error classes in `errors`.
    pub fn with_errors(
        context: &Arc<PeerContext>,
        service: Arc<ServiceDescriptor>,
        errors: ErrorRegistry,
    ) -> RpcResult<Self> {
        let peer = Peer::new(context, PeerKind::Client);
        let subjects = peer.subjects_for(service.name());
        let inbox = subjects.inbox(peer.peer_name());

        let inner = Arc::new(ClientInner {
            peer,
            service,
            subjects,
            inbox,
            errors: Arc::new(errors),
            default_timeout: context.config().default_timeout,
            pending: DashMap::new(),
            inbox_subscription: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let id = inner.peer.subscribe(&inner.inbox, move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.route_reply(message);
            }
        })?;
        *inner.inbox_subscription.lock() = Some(id);

        log::debug!(
            "Client {} for {} listening on {}",
            inner.peer.peer_id(),
            inner.service.name(),
            inner.inbox
        );
        Ok(Self { inner })
    }

    fn prepare<T: Serialize>(
        &self,
        method: &str,
        payload: T,
        options: &CallOptions,
        max_replies: Option<usize>,
    ) -> RpcResult<Prepared> {
        options.validate()?;
        let declared = self.inner.lookup(method)?;
        let timeout = self.inner.effective_timeout(declared, options);
        Ok(Prepared {
            client: self.inner.clone(),
            message_id: self.inner.next_message_id(),
            method: method.to_string(),
            payload: codec::to_payload(payload)?,
            timeout,
            max_replies,
        })
    }

    /// Build a unicast request to `peer_id`.
    ///
    /// # Errors
    ///
    /// `RpcError::UndefinedMethod` if the service does not export `method`,
    /// `RpcError::InvalidConfig` for unusable options.
    pub fn call<T: Serialize>(
        &self,
        peer_id: &str,
        method: &str,
        payload: T,
        options: CallOptions,
    ) -> RpcResult<Call> {
        Ok(Call {
            prepared: self.prepare(method, payload, &options, Some(1))?,
            peer_id: peer_id.to_string(),
        })
    }

    /// Build a multicast request.
    pub fn mcall<T: Serialize>(
        &self,
        method: &str,
        payload: T,
        options: CallOptions,
    ) -> RpcResult<Mcall> {
        let max_replies = options.max_replies;
        Ok(Mcall {
            prepared: self.prepare(method, payload, &options, max_replies)?,
        })
    }

    /// Build a fire-and-forget multicast.
    pub fn mcast<T: Serialize>(&self, method: &str, payload: T) -> RpcResult<Mcast> {
        self.inner.lookup(method)?;
        Ok(Mcast {
            client: self.inner.clone(),
            message_id: self.inner.next_message_id(),
            method: method.to_string(),
            payload: codec::to_payload(payload)?,
        })
    }

    /// Number of requests waiting for replies
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Id of the client peer
    pub fn peer_id(&self) -> &str {
        self.inner.peer.peer_id()
    }

    /// Name of the client peer
    pub fn peer_name(&self) -> &str {
        self.inner.peer.peer_name()
    }

    /// `rpc.<namespace>`
    pub fn base_subject(&self) -> &str {
        self.inner.subjects.base()
    }

    /// Subject replies are delivered to
    pub fn inbox_subject(&self) -> &str {
        &self.inner.inbox
    }

    /// Descriptor of the target service
    pub fn service(&self) -> &Arc<ServiceDescriptor> {
        &self.inner.service
    }

    /// Release the inbox and drop every pending request.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Check if the client was shut down
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer_id", &self.peer_id())
            .field("service", &self.inner.service.name())
            .field("pending", &self.pending_count())
            .finish()
    }
}
