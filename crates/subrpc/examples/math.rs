// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Example code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Examples panic on failure

/// Math service example
///
/// Demonstrates:
/// - Exporting methods with a declared timeout
/// - Hosting one service on two server peers
/// - Multicast call (`ping`), stopped after the first pong
/// - Direct call (`multiply`) to the peer that answered first
///
/// Run with `RUST_LOG=debug` to see the subjects and messages.
use std::sync::Arc;
use std::time::Duration;
use subrpc::{
    CallOptions, Client, MemoryTransport, MethodOptions, PeerContext, RequestEvent, RpcConfig,
    Server, ServerRequest, Service,
};

fn math_service() -> Result<Service, subrpc::RpcError> {
    Service::builder("Math")
        .export("ping", |request: ServerRequest| {
            request.reply("pong")?;
            Ok(())
        })
        .export_with(
            "multiply",
            MethodOptions::default().with_timeout(Duration::from_secs(2)),
            |request: ServerRequest| {
                let n: i64 = request.payload_as()?;
                request.reply(n * fastrand::i64(0..10))?;
                Ok(())
            },
        )
        .build()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== subrpc Math example ===\n");

    let transport = Arc::new(MemoryTransport::new());
    let math = Arc::new(math_service()?);

    let server_context = PeerContext::new(transport.clone(), RpcConfig::new().with_peer_name("math"))?;
    let servers = [
        Server::new(&server_context, math.clone())?,
        Server::new(&server_context, math.clone())?,
    ];
    for server in &servers {
        println!("Server {} hosting {:?}", server.peer_id(), server.services());
    }

    let client_context = PeerContext::new(transport, RpcConfig::default())?;
    let client = Client::new(&client_context, math.descriptor().clone())?;
    println!("Client {} listening on {}\n", client.peer_id(), client.inbox_subject());

    let mut ping = client
        .mcall("ping", (), CallOptions::new().with_timeout(Duration::from_secs(1)))?
        .execute()?;

    let first = match ping.next_event().await {
        Some(RequestEvent::Reply(reply)) => reply,
        Some(RequestEvent::Timeout) | None => {
            println!("No server answered the ping");
            return Ok(());
        }
    };
    ping.stop();
    println!(
        "mcall ping #{}: {} from {}",
        first.message_id(),
        first.payload().cloned().unwrap_or_default(),
        first.peer_id()
    );

    let reply = client
        .call(first.peer_id(), "multiply", 10, CallOptions::new())?
        .execute()?
        .first_reply()
        .await;

    match reply {
        Some(reply) => match reply.result() {
            Ok(product) => println!("call multiply(10) on {}: {}", reply.peer_id(), product),
            Err(e) => println!("call multiply(10) on {} failed: {}", reply.peer_id(), e),
        },
        None => println!("call multiply(10) timed out"),
    }

    println!("\nServed requests:");
    for server in &servers {
        println!("  {}: {}", server.peer_id(), server.requests_processed());
    }
    Ok(())
}
