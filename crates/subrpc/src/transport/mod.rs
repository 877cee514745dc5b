// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publish/subscribe substrate the RPC layer runs on.
//!
//! The RPC core needs three operations from the messaging system:
//! publish bytes on a subject, subscribe to a subject and receive its
//! messages as a stream, and cancel a subscription. Delivery is assumed
//! to be at-most-once and unordered.
//!
//! | Transport | Use |
//! |-----------|-----|
//! | [`memory::MemoryTransport`] | in-process broker (tests, single-process deployments) |

pub mod memory;

use crate::error::RpcResult;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use memory::MemoryTransport;

/// Handle identifying one subscription on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// An active subscription: raw message bodies arrive on `receiver`.
///
/// The stream ends when the subscription is cancelled or the transport closes.
#[derive(Debug)]
pub struct Subscription {
    /// Handle for [`Transport::unsubscribe`]
    pub id: SubscriptionId,
    /// Subscribed subject
    pub subject: String,
    /// Inbound message bodies
    pub receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Messaging substrate.
pub trait Transport: Send + Sync + 'static {
    /// Publish one message on `subject`.
    ///
    /// Publishing to a subject nobody listens on is not an error.
    fn publish(&self, subject: &str, payload: Vec<u8>) -> RpcResult<()>;

    /// Subscribe to `subject`.
    fn subscribe(&self, subject: &str) -> RpcResult<Subscription>;

    /// Cancel a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId) -> RpcResult<()>;
}

/// Shared transport handle.
pub type TransportPtr = Arc<dyn Transport>;
