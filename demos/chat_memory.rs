//! Chat example using the in-memory transport.
//!
//! Two lobby sessions share one `MemoryHub` in a single process. Each
//! registers a chat handler, then they exchange a directed message, a group
//! message and a broadcast.
//!
//! Run with: RUST_LOG=proton=debug cargo run --example chat_memory

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use proton::{ExecutionLane, MemoryHub, MessageAttributes, Result, SessionBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ChatLine {
    room: String,
    text: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_line_number(true)
        .init();

    let hub = MemoryHub::new();
    let alice = SessionBuilder::new("alice")
        .group("lobbies")
        .memory(hub.clone())
        .connect()
        .await?;
    let bob = SessionBuilder::new("bob")
        .group("lobbies")
        .memory(hub.clone())
        .connect()
        .await?;

    let (tx, mut lines) = mpsc::unbounded_channel();
    for session in [&alice, &bob] {
        let tx = tx.clone();
        let me = session.client_name().to_string();
        session
            .register_handler("chat", "line", ExecutionLane::Background, move |line: ChatLine, attrs: &MessageAttributes| {
                let _ = tx.send(format!("{me} <- {} [{}]: {}", attrs.sender_name(), line.room, line.text));
            })
            .await?;
    }
    drop(tx);

    let line = |text: &str| ChatLine {
        room: "main".into(),
        text: text.into(),
    };

    // Directed to bob only.
    alice.send("chat", "line", &line("hi bob"), "bob").await?;
    // Group send: both members, including alice herself.
    bob.send("chat", "line", &line("hello lobby"), "lobbies").await?;
    // Broadcast: everyone but the sender.
    alice.broadcast("chat", "line", &line("anyone here?")).await?;

    for _ in 0..4 {
        match tokio::time::timeout(Duration::from_secs(1), lines.recv()).await {
            Ok(Some(text)) => println!("{text}"),
            _ => break,
        }
    }

    alice.tear_down().await;
    bob.tear_down().await;
    println!("queues left on hub: {}", hub.queue_count().await);
    Ok(())
}
