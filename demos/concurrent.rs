//! Concurrent - many tasks sharing one connection.
//!
//! Every task calls a handler that sleeps for a different time. Responses
//! come back in completion order, not in request order, and each task still
//! gets its own reply.
//!
//! ```text
//! cargo run --example concurrent
//! ```

use std::time::{Duration, Instant};

use muxwire_client::{Client, RequestContext, Server};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CALLS: u64 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = Server::builder()
        .handle("Work.Sleep", |ms: u64, ctx: RequestContext| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ctx.respond(&format!("slept {}ms", ms)).await
        })
        .build();

    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move { server.serve_connection(server_side).await });
    let client = Client::new(client_side);

    let started = Instant::now();
    let mut tasks = JoinSet::new();
    for i in 0..CALLS {
        let client = client.clone();
        // Later requests finish first
        let ms = (CALLS - i) * 50;
        tasks.spawn(async move {
            let reply = client.call::<_, String>("Work.Sleep", &ms).await?;
            Ok::<_, muxwire_client::MuxwireError>((i, reply.into_result()?))
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (i, text) = joined??;
        println!("[{:>4}ms] request #{} -> {}", started.elapsed().as_millis(), i, text);
    }

    client.close().await;
    Ok(())
}
