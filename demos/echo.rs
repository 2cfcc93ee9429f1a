//! Echo - one server and one client over a local socket.
//!
//! This example demonstrates:
//! - Serving typed handlers with `Server::builder()`
//! - Connecting a `Client` over the local pipe transport
//! - Telling a successful reply from an application error
//!
//! ```text
//! RUST_LOG=muxwire_client=trace cargo run --example echo
//! ```

use muxwire_client::transport::{generate_pipe_path, PipeListener, PipeStream};
use muxwire_client::{Client, RequestContext, Server};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Serialize, Deserialize, Debug)]
struct EchoInput {
    message: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct EchoOutput {
    echo: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,muxwire_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = Server::builder()
        .handle("Echo.Do", |data: EchoInput, ctx: RequestContext| async move {
            ctx.respond(&EchoOutput { echo: data.message }).await
        })
        .handle("Echo.Strict", |data: EchoInput, ctx: RequestContext| async move {
            if data.message.is_empty() {
                ctx.error("empty message").await
            } else {
                ctx.respond(&EchoOutput { echo: data.message }).await
            }
        })
        .build();

    let path = generate_pipe_path();
    let listener = PipeListener::bind(&path).await?;
    let serving = tokio::spawn(async move {
        let stream = listener.accept().await?;
        server.serve_connection(stream).await
    });

    let client = Client::new(PipeStream::connect(&path).await?);

    let input = EchoInput {
        message: "hello".to_string(),
    };
    let reply = client.call::<_, EchoOutput>("Echo.Do", &input).await?;
    println!("Echo.Do -> {:?}", reply.into_result()?);

    let input = EchoInput {
        message: String::new(),
    };
    let reply = client.call::<_, EchoOutput>("Echo.Strict", &input).await?;
    println!("Echo.Strict -> error {:?}", reply.error);

    client.close().await;
    serving.await??;

    Ok(())
}
