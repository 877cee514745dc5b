// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-module tests: client and server over one in-memory transport.

use super::*;
use crate::codec::{Codec, JsonCodec};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, PartialEq)]
struct Overdrawn(String);

impl std::fmt::Display for Overdrawn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Overdrawn {}

impl DeclaredError for Overdrawn {
    const CLASS: &'static str = "Bank::Overdrawn";

    fn from_message(message: String) -> Self {
        Self(message)
    }
}

fn bank() -> Arc<Service> {
    Arc::new(
        Service::builder("Bank")
            .export("balance", |request: ServerRequest| {
                request.reply(100)?;
                Ok(())
            })
            .export("withdraw", |request: ServerRequest| {
                let amount: i64 = request.payload_as()?;
                if amount > 100 {
                    return Err(Overdrawn(format!("balance {}", 100 - amount)).into());
                }
                request.reply(100 - amount)?;
                Ok(())
            })
            .export("deferred", |request: ServerRequest| {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if let Err(e) = request.reply_error(Overdrawn("later".to_string())) {
                        log::error!("deferred reply failed: {}", e);
                    }
                });
                Ok(())
            })
            .build()
            .unwrap(),
    )
}

fn context(transport: &Arc<MemoryTransport>, name: &str) -> Arc<PeerContext> {
    PeerContext::new(transport.clone(), RpcConfig::new().with_peer_name(name)).unwrap()
}

#[tokio::test]
async fn test_call_round_trip() {
    let transport = Arc::new(MemoryTransport::new());
    let server = Server::new(&context(&transport, "srv"), bank()).unwrap();
    let client = Client::new(&context(&transport, "cli"), bank().descriptor().clone()).unwrap();

    let reply = client
        .call(server.peer_id(), "withdraw", 30, CallOptions::new())
        .unwrap()
        .execute()
        .unwrap()
        .first_reply()
        .await
        .unwrap();

    assert_eq!(reply.payload_as::<i64>().unwrap(), 70);
    assert_eq!(reply.peer_id(), "srv.0");
    assert_eq!(reply.peer_name(), Some("srv"));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_declared_error_reconstructs() {
    let transport = Arc::new(MemoryTransport::new());
    let server = Server::new(&context(&transport, "srv"), bank()).unwrap();
    let client = Client::with_errors(
        &context(&transport, "cli"),
        bank().descriptor().clone(),
        ErrorRegistry::new().with::<Overdrawn>(),
    )
    .unwrap();

    let reply = client
        .call(server.peer_id(), "withdraw", 250, CallOptions::new())
        .unwrap()
        .execute()
        .unwrap()
        .first_reply()
        .await
        .unwrap();

    let err = reply.result().unwrap_err();
    assert_eq!(
        err.downcast_ref::<Overdrawn>(),
        Some(&Overdrawn("balance -150".to_string()))
    );
}

#[tokio::test]
async fn test_unregistered_error_class_is_reported() {
    let transport = Arc::new(MemoryTransport::new());
    let server = Server::new(&context(&transport, "srv"), bank()).unwrap();
    let client = Client::new(&context(&transport, "cli"), bank().descriptor().clone()).unwrap();

    let reply = client
        .call(server.peer_id(), "withdraw", 250, CallOptions::new())
        .unwrap()
        .execute()
        .unwrap()
        .first_reply()
        .await
        .unwrap();

    match reply.result() {
        Err(ReplyError::UnknownClass(wire)) => assert_eq!(wire.class, "Bank::Overdrawn"),
        other => panic!("expected unknown class, got {:?}", other),
    }
}

#[tokio::test]
async fn test_late_reply_from_spawned_task() {
    let transport = Arc::new(MemoryTransport::new());
    let server = Server::new(&context(&transport, "srv"), bank()).unwrap();
    let client = Client::with_errors(
        &context(&transport, "cli"),
        bank().descriptor().clone(),
        ErrorRegistry::new().with::<Overdrawn>(),
    )
    .unwrap();

    let reply = client
        .call(server.peer_id(), "deferred", (), CallOptions::new())
        .unwrap()
        .execute()
        .unwrap()
        .first_reply()
        .await
        .unwrap();

    assert_eq!(reply.error().map(|e| e.message.as_str()), Some("later"));
    assert!(reply.result().unwrap_err().downcast_ref::<Overdrawn>().is_some());
}

#[tokio::test]
async fn test_call_reaches_only_addressed_peer() {
    let transport = Arc::new(MemoryTransport::new());
    let ctx = context(&transport, "srv");
    let first = Server::new(&ctx, bank()).unwrap();
    let second = Server::new(&ctx, bank()).unwrap();
    let client = Client::new(&context(&transport, "cli"), bank().descriptor().clone()).unwrap();

    assert_eq!(first.peer_id(), "srv.0");
    assert_eq!(second.peer_id(), "srv.1");

    let reply = client
        .call(second.peer_id(), "balance", (), CallOptions::new())
        .unwrap()
        .execute()
        .unwrap()
        .first_reply()
        .await
        .unwrap();

    assert_eq!(reply.peer_id(), "srv.1");
    assert_eq!(first.requests_processed(), 0);
    assert_eq!(second.requests_processed(), 1);
}

#[tokio::test]
async fn test_shortcut_receives_reply() {
    let transport = Arc::new(MemoryTransport::new());
    let server = Server::new(&context(&transport, "srv"), bank()).unwrap();
    let client = Client::new(&context(&transport, "cli"), bank().descriptor().clone()).unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let handle = client
        .call(server.peer_id(), "balance", (), CallOptions::new())
        .unwrap()
        .shortcut(move |_handle, reply| {
            let _ = tx.send(reply.and_then(|r| r.payload().cloned()));
        })
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, Some(json!(100)));
    assert!(!handle.is_registered());
}

#[tokio::test(start_paused = true)]
async fn test_shortcut_reports_timeout_as_none() {
    let transport = Arc::new(MemoryTransport::new());
    let client = Client::new(&context(&transport, "cli"), bank().descriptor().clone()).unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    client
        .call(
            "nobody.0",
            "balance",
            (),
            CallOptions::new().with_timeout(Duration::from_millis(20)),
        )
        .unwrap()
        .shortcut(move |_handle, reply| {
            let _ = tx.send(reply.is_none());
        })
        .unwrap();

    assert_eq!(rx.recv().await, Some(true));
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn test_clients_sharing_an_inbox_keep_their_replies() {
    let transport = Arc::new(MemoryTransport::new());
    let server = Server::new(&context(&transport, "srv"), bank()).unwrap();
    let shared = context(&transport, "cli");
    let a = Client::new(&shared, bank().descriptor().clone()).unwrap();
    let b = Client::new(&shared, bank().descriptor().clone()).unwrap();
    assert_eq!(a.inbox_subject(), b.inbox_subject());

    let lost = b
        .call(
            "nobody.0",
            "balance",
            (),
            CallOptions::new().with_timeout(Duration::from_millis(200)),
        )
        .unwrap()
        .execute()
        .unwrap();
    let answered = a
        .call(server.peer_id(), "withdraw", 1, CallOptions::new())
        .unwrap()
        .execute()
        .unwrap();
    assert_ne!(lost.message_id(), answered.message_id());

    let reply = answered.first_reply().await.unwrap();
    assert_eq!(reply.payload_as::<i64>().unwrap(), 99);

    let mut lost = lost;
    assert!(matches!(lost.next_event().await, Some(RequestEvent::Timeout)));
    assert!(lost.next_event().await.is_none());
}

#[test]
fn test_envelopes_survive_codec() {
    let request = types::RequestMessage {
        message_id: MessageId(12),
        peer_id: "cli.0".to_string(),
        peername: Some("cli".to_string()),
        method: "withdraw".to_string(),
        payload: json!({"amount": 5}),
        reply_to: Some("rpc.Bank.inbox.cli".to_string()),
    };

    let codec = JsonCodec;
    let bytes = codec.encode(&codec::to_map(&request).unwrap()).unwrap();
    let decoded: types::RequestMessage = codec::from_map(codec.decode(&bytes).unwrap()).unwrap();
    assert_eq!(decoded, request);
}
