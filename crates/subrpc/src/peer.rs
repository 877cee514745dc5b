// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer identity and transport plumbing shared by clients and servers.
//!
//! # Identity
//!
//! - `peer_name`: stable per process (config override, else `<hostname>-<pid>`)
//! - `peer_id`: `<peer_name>.<n>` where `n` counts the peers of the same
//!   kind created from one [`PeerContext`], so several clients or servers
//!   in one process stay distinguishable.

use crate::codec::{self, Codec, JsonCodec, MessageMap};
use crate::config::RpcConfig;
use crate::error::RpcResult;
use crate::subject::Subjects;
use crate::transport::{SubscriptionId, TransportPtr};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Kind of peer, each with its own id counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKind {
    /// Sends requests and receives replies on its inbox
    Client,
    /// Hosts services and answers requests
    Server,
}

/// Context shared by every peer talking over one transport.
///
/// Owns the transport handle, the codec, the configuration and the
/// per-kind peer counters.
pub struct PeerContext {
    transport: TransportPtr,
    codec: Arc<dyn Codec>,
    config: RpcConfig,
    clients: AtomicU64,
    servers: AtomicU64,
}

impl PeerContext {
    /// Create a context using the JSON codec.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::InvalidConfig` if `config` does not validate.
    pub fn new(transport: TransportPtr, config: RpcConfig) -> RpcResult<Arc<Self>> {
        Self::with_codec(transport, Arc::new(JsonCodec), config)
    }

    /// Create a context with a custom codec.
    pub fn with_codec(
        transport: TransportPtr,
        codec: Arc<dyn Codec>,
        config: RpcConfig,
    ) -> RpcResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            transport,
            codec,
            config,
            clients: AtomicU64::new(0),
            servers: AtomicU64::new(0),
        }))
    }

    /// Configuration in effect
    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Transport handle
    pub fn transport(&self) -> &TransportPtr {
        &self.transport
    }

    fn next_index(&self, kind: PeerKind) -> u64 {
        let counter = match kind {
            PeerKind::Client => &self.clients,
            PeerKind::Server => &self.servers,
        };
        counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PeerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerContext")
            .field("config", &self.config)
            .field("clients", &self.clients)
            .field("servers", &self.servers)
            .finish_non_exhaustive()
    }
}

/// One addressable participant in the RPC overlay.
pub struct Peer {
    context: Arc<PeerContext>,
    kind: PeerKind,
    peer_name: String,
    peer_id: String,

    /// Subscription id -> decode task
    subscriptions: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
}

impl Peer {
    /// Create a peer, assigning the next id for `kind`.
    pub fn new(context: &Arc<PeerContext>, kind: PeerKind) -> Self {
        let peer_name = context.config.resolved_peer_name();
        let peer_id = format!("{}.{}", peer_name, context.next_index(kind));
        log::debug!("peer {} created ({:?})", peer_id, kind);

        Self {
            context: context.clone(),
            kind,
            peer_name,
            peer_id,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Process-stable peer name
    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// Unique id of this peer
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Peer kind
    pub fn kind(&self) -> PeerKind {
        self.kind
    }

    /// Shared context
    pub fn context(&self) -> &Arc<PeerContext> {
        &self.context
    }

    /// Subjects for a service: rooted at `rpc.<namespace>`, the namespace
    /// defaulting to the service name.
    pub fn subjects_for(&self, service_name: &str) -> Subjects {
        Subjects::new(self.context.config.namespace_for(service_name))
    }

    /// Encode `message` and publish it on `subject`.
    ///
    /// Transport failures are returned unchanged; nothing is retried.
    pub fn publish<T: Serialize>(&self, subject: &str, message: &T) -> RpcResult<()> {
        let map = codec::to_map(message)?;
        let bytes = self.context.codec.encode(&map)?;
        self.context.transport.publish(subject, bytes)
    }

    /// Subscribe to `subject`, decoding each message before calling `handler`.
    ///
    /// Undecodable messages are logged and skipped. A panicking `handler`
    /// is logged and the subscription keeps running. Must be called from
    /// within a tokio runtime.
    pub fn subscribe<F>(&self, subject: &str, handler: F) -> RpcResult<SubscriptionId>
    where
        F: Fn(MessageMap) + Send + Sync + 'static,
    {
        let subscription = self.context.transport.subscribe(subject)?;
        let id = subscription.id;
        let codec = self.context.codec.clone();
        let subject = subscription.subject;
        let mut receiver = subscription.receiver;

        let task = tokio::spawn(async move {
            while let Some(bytes) = receiver.recv().await {
                match codec.decode(&bytes) {
                    Ok(map) => {
                        if panic::catch_unwind(AssertUnwindSafe(|| handler(map))).is_err() {
                            log::error!("handler for {} panicked; message dropped", subject);
                        }
                    }
                    Err(e) => log::warn!("dropping undecodable message on {}: {}", subject, e),
                }
            }
        });

        self.subscriptions.lock().insert(id, task);
        Ok(id)
    }

    /// Cancel a subscription made with [`Peer::subscribe`]. Idempotent.
    pub fn unsubscribe(&self, id: SubscriptionId) -> RpcResult<()> {
        let Some(task) = self.subscriptions.lock().remove(&id) else {
            return Ok(());
        };
        task.abort();
        self.context.transport.unsubscribe(id)
    }

    /// Cancel every subscription of this peer.
    pub fn unsubscribe_all(&self) {
        let tasks: Vec<_> = self.subscriptions.lock().drain().collect();
        for (id, task) in tasks {
            task.abort();
            if let Err(e) = self.context.transport.unsubscribe(id) {
                log::warn!("{}: failed to unsubscribe {}: {}", self.peer_id, id, e);
            }
        }
    }

    /// Number of active subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("kind", &self.kind)
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use crate::transport::{MemoryTransport, Transport};
    use serde_json::json;
    use std::time::Duration;

    fn context(name: &str) -> (Arc<MemoryTransport>, Arc<PeerContext>) {
        let transport = Arc::new(MemoryTransport::new());
        let context =
            PeerContext::new(transport.clone(), RpcConfig::new().with_peer_name(name)).unwrap();
        (transport, context)
    }

    #[test]
    fn ids_count_per_kind() {
        let (_, context) = context("node");
        let c0 = Peer::new(&context, PeerKind::Client);
        let c1 = Peer::new(&context, PeerKind::Client);
        let s0 = Peer::new(&context, PeerKind::Server);

        assert_eq!(c0.peer_name(), "node");
        assert_eq!(c0.peer_id(), "node.0");
        assert_eq!(c1.peer_id(), "node.1");
        assert_eq!(s0.peer_id(), "node.0");
        assert_eq!(s0.kind(), PeerKind::Server);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let transport = Arc::new(MemoryTransport::new());
        let result = PeerContext::new(transport, RpcConfig::new().with_peer_name("a.b"));
        assert!(matches!(result, Err(RpcError::InvalidConfig(_))));
    }

    #[test]
    fn subjects_follow_namespace_override() {
        let transport = Arc::new(MemoryTransport::new());
        let context = PeerContext::new(
            transport,
            RpcConfig::new().with_peer_name("n").with_namespace("billing"),
        )
        .unwrap();
        let peer = Peer::new(&context, PeerKind::Client);
        assert_eq!(peer.subjects_for("Math").base(), "rpc.billing");
    }

    #[tokio::test]
    async fn publish_encodes_and_subscribe_decodes() {
        let (_, context) = context("node");
        let peer = Peer::new(&context, PeerKind::Server);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        peer.subscribe("rpc.Math.mcast", move |map| {
            let _ = tx.send(map);
        })
        .unwrap();
        peer.publish("rpc.Math.mcast", &json!({"method": "sink"}))
            .unwrap();

        let map = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(map.get("method"), Some(&json!("sink")));
    }

    #[tokio::test]
    async fn undecodable_messages_are_skipped() {
        let (transport, context) = context("node");
        let peer = Peer::new(&context, PeerKind::Server);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        peer.subscribe("rpc.Math.mcast", move |map| {
            let _ = tx.send(map);
        })
        .unwrap();
        transport
            .publish("rpc.Math.mcast", b"not json".to_vec())
            .unwrap();
        peer.publish("rpc.Math.mcast", &json!({"n": 1})).unwrap();

        let map = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(map.get("n"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn panicking_handler_keeps_subscription_alive() {
        let (transport, context) = context("node");
        let peer = Peer::new(&context, PeerKind::Server);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        peer.subscribe("rpc.Math.mcast", move |map| {
            if map.get("n") == Some(&json!(1)) {
                panic!("first message");
            }
            let _ = tx.send(map);
        })
        .unwrap();
        peer.publish("rpc.Math.mcast", &json!({"n": 1})).unwrap();
        peer.publish("rpc.Math.mcast", &json!({"n": 2})).unwrap();

        let map = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(map.get("n"), Some(&json!(2)));
        assert_eq!(transport.subscriber_count("rpc.Math.mcast"), 1);
    }

    #[tokio::test]
    async fn unsubscribe_releases_transport_subscription() {
        let (transport, context) = context("node");
        let peer = Peer::new(&context, PeerKind::Client);
        let id = peer.subscribe("rpc.Math.inbox.node", |_| {}).unwrap();
        assert_eq!(transport.subscriber_count("rpc.Math.inbox.node"), 1);

        peer.unsubscribe(id).unwrap();
        assert_eq!(transport.subscriber_count("rpc.Math.inbox.node"), 0);
        assert_eq!(peer.subscription_count(), 0);
        assert!(peer.unsubscribe(id).is_ok());
    }

    #[tokio::test]
    async fn drop_unsubscribes_everything() {
        let (transport, context) = context("node");
        let peer = Peer::new(&context, PeerKind::Server);
        peer.subscribe("rpc.Math.mcall", |_| {}).unwrap();
        peer.subscribe("rpc.Math.mcast", |_| {}).unwrap();
        drop(peer);

        assert_eq!(transport.subscriber_count("rpc.Math.mcall"), 0);
        assert_eq!(transport.subscriber_count("rpc.Math.mcast"), 0);
    }
}
