//! Integration tests for muxwire-client.
//!
//! Most tests run a real `Server` on the far end of an in-memory duplex
//! stream. Tests that need exact control over response order or stream
//! failure drive the far end by hand with the protocol primitives.

use std::time::Duration;

use muxwire_client::codec::{Codec, JsonCodec, MsgPackCodec};
use muxwire_client::protocol::{encode_frame, flags, FrameBuffer, RequestHeader, ResponseHeader};
use muxwire_client::server::{RequestContext, Server, ServerBuilder};
use muxwire_client::{Client, ClientBuilder, MuxwireError, Reply};
use serde::{Deserialize, Serialize};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinSet;

fn test_server() -> Server {
    Server::builder()
        .handle("Echo.Do", |text: String, ctx: RequestContext| async move {
            ctx.respond(&text).await
        })
        .handle("Arith.Add", |(a, b): (i64, i64), ctx: RequestContext| async move {
            ctx.respond(&(a + b)).await
        })
        .handle("Slow.Sleep", |ms: u64, ctx: RequestContext| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ctx.respond(&ms).await
        })
        .handle("KV.Get", |key: String, ctx: RequestContext| async move {
            if key == "answer" {
                ctx.respond(&42).await
            } else {
                ctx.error("not found").await
            }
        })
        .handle("KV.Partial", |_: (), ctx: RequestContext| async move {
            ctx.error_with("partial failure", &vec![1u32, 2, 3]).await
        })
        .handle("Fail.Always", |_: (), _ctx: RequestContext| async move {
            Err(MuxwireError::Protocol("boom".to_string()))
        })
        .handle("Fail.Silent", |_: (), _ctx: RequestContext| async move { Ok(()) })
        .build()
}

fn connect(server: Server) -> Client {
    let (client_side, server_side) = duplex(64 * 1024);
    tokio::spawn(async move {
        let _ = server.serve_connection(server_side).await;
    });
    Client::new(client_side)
}

/// Read exactly `count` request frames from the hand-driven peer.
async fn read_requests(peer: &mut DuplexStream, count: usize) -> Vec<RequestHeader> {
    let mut parser = FrameBuffer::new();
    let mut out = Vec::new();
    let mut buf = vec![0u8; 4096];
    while out.len() < count {
        let n = peer.read(&mut buf).await.unwrap();
        assert!(n > 0, "client stopped before sending {} requests", count);
        for frame in parser.push(&buf[..n]).unwrap() {
            assert!(!frame.is_response());
            out.push(frame.decode_header::<MsgPackCodec, RequestHeader>().unwrap());
        }
    }
    out
}

async fn write_response<B: Serialize>(peer: &mut DuplexStream, request: &RequestHeader, body: &B) {
    let header = ResponseHeader::ok(request);
    let bytes = encode_frame::<MsgPackCodec, _, _>(flags::RESPONSE, &header, body).unwrap();
    peer.write_all(&bytes).await.unwrap();
}

// ============================================================================
// Basic calls
// ============================================================================

#[tokio::test]
async fn test_single_echo_call() {
    let client = connect(test_server());

    let handle = client.start_call("Echo.Do", "hello").await.unwrap();
    assert_eq!(handle.seq(), 1);

    let raw = handle.wait().await.unwrap();
    assert_eq!(raw.seq, 1);
    assert_eq!(raw.service_method, "Echo.Do");
    assert!(raw.error.is_none());

    let reply: Reply<String> = Reply::decode::<MsgPackCodec>(raw).unwrap();
    assert_eq!(reply.result.as_deref(), Some("hello"));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_struct_arguments_and_result() {
    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    let server = Server::builder()
        .handle("Geo.Flip", |p: Point, ctx: RequestContext| async move {
            ctx.respond(&Point { x: p.y, y: p.x }).await
        })
        .build();
    let client = connect(server);

    let reply = client
        .call::<_, Point>("Geo.Flip", &Point { x: 1, y: 2 })
        .await
        .unwrap();
    assert_eq!(reply.into_result().unwrap(), Point { x: 2, y: 1 });
}

#[tokio::test]
async fn test_sequential_calls_reuse_connection() {
    let client = connect(test_server());

    for i in 0..20i64 {
        let reply = client.call::<_, i64>("Arith.Add", &(i, i)).await.unwrap();
        assert_eq!(reply.into_result().unwrap(), i * 2);
    }
    assert_eq!(client.pending_calls(), 0);
}

// ============================================================================
// Concurrency and correlation
// ============================================================================

#[tokio::test]
async fn test_concurrent_calls_get_their_own_replies() {
    let client = connect(test_server());
    let mut tasks = JoinSet::new();

    for i in 0..200 {
        let client = client.clone();
        tasks.spawn(async move {
            let text = format!("message-{}", i);
            let reply = client.call::<_, String>("Echo.Do", &text).await.unwrap();
            assert_eq!(reply.into_result().unwrap(), text);
        });
    }

    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_get_unique_sequence_numbers() {
    let (client_side, mut peer) = duplex(256 * 1024);
    let client = Client::new(client_side);
    let mut tasks = JoinSet::new();

    for i in 0..50u32 {
        let client = client.clone();
        tasks.spawn(async move { client.start_call("Echo.Do", &i).await.unwrap().seq() });
    }

    let mut seqs = Vec::new();
    while let Some(result) = tasks.join_next().await {
        seqs.push(result.unwrap());
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (1..=50).collect::<Vec<u64>>());

    // Wire order matches assignment order
    let wire: Vec<u64> = read_requests(&mut peer, 50).await.iter().map(|h| h.seq).collect();
    assert_eq!(wire, (1..=50).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_slow_call_does_not_block_fast_call() {
    let client = connect(test_server());

    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.call::<_, u64>("Slow.Sleep", &200u64).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let fast = client.call::<_, u64>("Slow.Sleep", &0u64).await.unwrap();
    assert_eq!(fast.result, Some(0));
    assert!(!slow.is_finished());

    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow.result, Some(200));
}

#[tokio::test]
async fn test_responses_in_reverse_order() {
    let (client_side, mut peer) = duplex(64 * 1024);
    let client = Client::new(client_side);

    let mut handles = Vec::new();
    for word in ["zero", "one", "two", "three"] {
        handles.push((word, client.start_call("Echo.Do", word).await.unwrap()));
    }

    let requests = read_requests(&mut peer, 4).await;
    for (request, (word, _)) in requests.iter().zip(&handles).rev() {
        write_response(&mut peer, request, &format!("reply-{}", word)).await;
    }

    for (word, handle) in handles {
        let reply: Reply<String> = Reply::decode::<MsgPackCodec>(handle.wait().await.unwrap()).unwrap();
        assert_eq!(reply.result.unwrap(), format!("reply-{}", word));
    }
}

#[tokio::test]
async fn test_unknown_sequence_number_is_ignored() {
    let (client_side, mut peer) = duplex(64 * 1024);
    let client = Client::new(client_side);

    let handle = client.start_call("Echo.Do", "x").await.unwrap();
    let requests = read_requests(&mut peer, 1).await;

    let stray = RequestHeader::new("Echo.Do", 999);
    write_response(&mut peer, &stray, &"stray").await;
    write_response(&mut peer, &requests[0], &"x").await;

    let raw = handle.wait().await.unwrap();
    assert_eq!(MsgPackCodec::decode::<String>(&raw.body).unwrap(), "x");
    assert!(!client.is_closed());
}

// ============================================================================
// Application errors
// ============================================================================

#[tokio::test]
async fn test_application_error_with_empty_payload() {
    let client = connect(test_server());

    let reply = client.call::<_, i64>("KV.Get", "missing").await.unwrap();
    assert_eq!(reply.error.as_deref(), Some("not found"));
    assert!(reply.result.is_none());

    // Connection unaffected
    let reply = client.call::<_, i64>("KV.Get", "answer").await.unwrap();
    assert_eq!(reply.into_result().unwrap(), 42);
}

#[tokio::test]
async fn test_application_error_keeps_payload() {
    let client = connect(test_server());

    let reply = client.call::<_, Vec<u32>>("KV.Partial", &()).await.unwrap();
    assert_eq!(reply.error.as_deref(), Some("partial failure"));
    assert_eq!(reply.result, Some(vec![1, 2, 3]));
}

#[tokio::test]
async fn test_unknown_service_method() {
    let client = connect(test_server());

    let reply = client.call::<_, ()>("Nope.Nope", &()).await.unwrap();
    assert_eq!(reply.error.as_deref(), Some("unknown service method: Nope.Nope"));
}

#[tokio::test]
async fn test_handler_failures_become_error_replies() {
    let client = connect(test_server());

    let failed = client.call::<_, ()>("Fail.Always", &()).await.unwrap();
    assert!(failed.error.unwrap().contains("boom"));

    let silent = client.call::<_, ()>("Fail.Silent", &()).await.unwrap();
    assert!(silent.error.is_some());

    let bad_args = client.call::<_, i64>("Arith.Add", "not a pair").await.unwrap();
    assert!(bad_args.error.unwrap().contains("invalid arguments"));
}

#[tokio::test]
async fn test_undecodable_success_body_fails_only_that_call() {
    let client = connect(test_server());

    let result = client.call::<_, i64>("Echo.Do", "not a number").await;
    assert!(matches!(result, Err(MuxwireError::MsgPackDecode(_))));

    let reply = client.call::<_, String>("Echo.Do", "still fine").await.unwrap();
    assert_eq!(reply.into_result().unwrap(), "still fine");
}

#[tokio::test]
async fn test_empty_service_method_rejected() {
    let client = connect(test_server());
    assert!(matches!(
        client.call::<_, ()>("", &()).await,
        Err(MuxwireError::InvalidServiceMethod(_))
    ));
    assert!(!client.is_closed());
}

// ============================================================================
// Connection failure and close
// ============================================================================

#[tokio::test]
async fn test_stream_death_fails_all_pending_calls() {
    let (client_side, mut peer) = duplex(64 * 1024);
    let client = Client::new(client_side);

    let mut handles = Vec::new();
    for i in 0..3u32 {
        handles.push(client.start_call("Echo.Do", &i).await.unwrap());
    }
    read_requests(&mut peer, 3).await;
    assert_eq!(client.pending_calls(), 3);

    drop(peer);

    for handle in handles {
        assert!(matches!(handle.wait().await, Err(MuxwireError::ConnectionBroken)));
    }
    client.closed().await;
    assert_eq!(client.pending_calls(), 0);
    assert!(matches!(
        client.call::<_, ()>("Echo.Do", &()).await,
        Err(MuxwireError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_stream_death_mid_frame() {
    let (client_side, mut peer) = duplex(64 * 1024);
    let client = Client::new(client_side);

    let handle = client.start_call("Echo.Do", "x").await.unwrap();
    let requests = read_requests(&mut peer, 1).await;

    let header = ResponseHeader::ok(&requests[0]);
    let bytes = encode_frame::<MsgPackCodec, _, _>(flags::RESPONSE, &header, "x").unwrap();
    peer.write_all(&bytes[..bytes.len() - 1]).await.unwrap();
    drop(peer);

    assert!(matches!(handle.wait().await, Err(MuxwireError::ConnectionBroken)));
}

#[tokio::test]
async fn test_oversized_response_breaks_connection() {
    let (client_side, server_side) = duplex(64 * 1024);
    let server = test_server();
    tokio::spawn(async move {
        let _ = server.serve_connection(server_side).await;
    });
    let client = ClientBuilder::new().max_section_size(1024).build(client_side);

    let big = "x".repeat(4096);
    let result = client.call::<_, String>("Echo.Do", &big).await;
    assert!(matches!(result, Err(MuxwireError::ConnectionBroken)));
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_call_after_close_writes_nothing() {
    let (client_side, mut peer) = duplex(64 * 1024);
    let client = Client::new(client_side);

    // One answered call first
    let handle = client.start_call("Echo.Do", "before").await.unwrap();
    let requests = read_requests(&mut peer, 1).await;
    write_response(&mut peer, &requests[0], &"before").await;
    handle.wait().await.unwrap();

    client.close().await;
    assert!(client.is_closed());
    assert!(matches!(
        client.call::<_, String>("Echo.Do", "after").await,
        Err(MuxwireError::ConnectionClosed)
    ));

    // Only EOF follows the first request
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(1), peer.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_close_fails_in_flight_calls() {
    let client = connect(test_server());

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.call::<_, u64>("Slow.Sleep", &10_000u64).await })
    };
    while client.pending_calls() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    client.close().await;
    assert!(matches!(pending.await.unwrap(), Err(MuxwireError::ConnectionBroken)));
    assert_eq!(client.pending_calls(), 0);

    // Idempotent
    client.close().await;
}

#[tokio::test]
async fn test_call_timeout_cleans_up() {
    let client = connect(test_server());

    let result = client
        .call_timeout::<_, u64>("Slow.Sleep", &200u64, Duration::from_millis(20))
        .await;
    assert!(matches!(result, Err(MuxwireError::Timeout { .. })));
    assert_eq!(client.pending_calls(), 0);

    // The late response is dropped, the connection keeps working
    tokio::time::sleep(Duration::from_millis(250)).await;
    let reply = client.call::<_, String>("Echo.Do", "after").await.unwrap();
    assert_eq!(reply.into_result().unwrap(), "after");
}

// ============================================================================
// Codecs and transports
// ============================================================================

#[tokio::test]
async fn test_json_codec_end_to_end() {
    let server = ServerBuilder::<JsonCodec>::with_codec()
        .handle("Echo.Do", |text: String, ctx: RequestContext<JsonCodec>| async move {
            ctx.respond(&text).await
        })
        .build();

    let (client_side, server_side) = duplex(64 * 1024);
    tokio::spawn(async move {
        let _ = server.serve_connection(server_side).await;
    });
    let client = ClientBuilder::new().codec::<JsonCodec>().build(client_side);

    let reply = client.call::<_, String>("Echo.Do", "json").await.unwrap();
    assert_eq!(reply.into_result().unwrap(), "json");

    let reply = client.call::<_, ()>("Missing.Method", &()).await.unwrap();
    assert_eq!(reply.error.as_deref(), Some("unknown service method: Missing.Method"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_over_unix_socket() {
    use muxwire_client::transport::{generate_pipe_path, PipeListener, PipeStream};

    let path = generate_pipe_path();
    let listener = PipeListener::bind(&path).await.unwrap();
    let server = test_server();
    let accept = tokio::spawn(async move {
        let stream = listener.accept().await.unwrap();
        server.serve_connection(stream).await
    });

    let client = Client::new(PipeStream::connect(&path).await.unwrap());
    let reply = client.call::<_, i64>("Arith.Add", &(40, 2)).await.unwrap();
    assert_eq!(reply.into_result().unwrap(), 42);

    client.close().await;
    tokio::time::timeout(Duration::from_secs(1), accept)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_server_returns_after_client_close() {
    let (client_side, server_side) = duplex(64 * 1024);
    let server = test_server();
    let serving = tokio::spawn(async move { server.serve_connection(server_side).await });

    let client = Client::new(client_side);
    client.call::<_, String>("Echo.Do", "bye").await.unwrap();
    client.close().await;

    tokio::time::timeout(Duration::from_secs(1), serving)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
