// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process publish/subscribe broker.
//!
//! Subjects are matched exactly. Every subscriber of a subject receives its
//! own copy of each message; subscribers whose receiver was dropped are
//! pruned on the next publish.

use crate::error::{RpcError, RpcResult};
use crate::transport::{Subscription, SubscriptionId, Transport};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

type Subscriber = (SubscriptionId, mpsc::UnboundedSender<Vec<u8>>);

/// In-memory transport.
///
/// # Example
///
/// ```rust
/// use subrpc::transport::{MemoryTransport, Transport};
///
/// let transport = MemoryTransport::new();
/// let mut sub = transport.subscribe("rpc.Math.mcall").unwrap();
/// transport.publish("rpc.Math.mcall", b"{}".to_vec()).unwrap();
/// assert_eq!(sub.receiver.try_recv().unwrap(), b"{}".to_vec());
/// ```
#[derive(Debug, Default)]
pub struct MemoryTransport {
    /// subject -> subscribers
    subjects: DashMap<String, Vec<Subscriber>>,

    next_id: AtomicU64,

    /// Messages accepted by `publish`
    published: AtomicU64,

    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `subject`
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.subjects.get(subject).map_or(0, |subs| subs.len())
    }

    /// Number of messages published so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Close the broker: every stream ends and further operations fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.subjects.clear();
    }

    fn ensure_open(&self) -> RpcResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(RpcError::Transport("memory transport closed".to_string()));
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn publish(&self, subject: &str, payload: Vec<u8>) -> RpcResult<()> {
        self.ensure_open()?;
        self.published.fetch_add(1, Ordering::Relaxed);

        let Some(mut subscribers) = self.subjects.get_mut(subject) else {
            log::trace!("memory transport: no subscribers on {}", subject);
            return Ok(());
        };

        subscribers.retain(|(id, tx)| {
            let alive = tx.send(payload.clone()).is_ok();
            if !alive {
                log::debug!("memory transport: pruned dead {} on {}", id, subject);
            }
            alive
        });
        Ok(())
    }

    fn subscribe(&self, subject: &str) -> RpcResult<Subscription> {
        self.ensure_open()?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subjects
            .entry(subject.to_string())
            .or_default()
            .push((id, tx));

        Ok(Subscription {
            id,
            subject: subject.to_string(),
            receiver: rx,
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) -> RpcResult<()> {
        for mut subscribers in self.subjects.iter_mut() {
            subscribers.retain(|(sid, _)| *sid != id);
        }
        self.subjects.retain(|_, subscribers| !subscribers.is_empty());
        Ok(())
    }
}
