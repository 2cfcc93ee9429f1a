//! Blocking - plain threads calling through `BlockingClient`.
//!
//! The runtime runs the connection in the background while ordinary OS
//! threads issue calls and block until their reply arrives.
//!
//! ```text
//! cargo run --example blocking
//! ```

use std::thread;

use muxwire_client::{BlockingClient, Client, Reply, RequestContext, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = tokio::runtime::Runtime::new()?;

    let client = runtime.block_on(async {
        let server = Server::builder()
            .handle("Arith.Mul", |(a, b): (i64, i64), ctx: RequestContext| async move {
                ctx.respond(&(a * b)).await
            })
            .build();

        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move { server.serve_connection(server_side).await });
        Client::new(client_side)
    });
    let client = BlockingClient::new(client, runtime.handle().clone());

    let workers: Vec<_> = (1..=4i64)
        .map(|n| {
            let client = client.clone();
            thread::spawn(move || -> muxwire_client::Result<()> {
                let reply: Reply<i64> = client.call("Arith.Mul", &(n, n))?;
                println!("thread {}: {} * {} = {}", n, n, n, reply.into_result()?);
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        if let Err(e) = worker.join().map_err(|_| "worker panicked")? {
            eprintln!("call failed: {}", e);
        }
    }

    client.close();
    Ok(())
}
