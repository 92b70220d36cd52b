//! End-to-end tests: a real client socket against a running server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use lumberjack_server::consumer::MessageConsumer;
use lumberjack_server::protocol::{
    encode_compressed, encode_data, encode_json, encode_window, VERSION_1, VERSION_2,
};
use lumberjack_server::{consumer_fn, LumberjackMessage, MessagePayload, Server};

/// Opt-in test logs: `RUST_LOG=debug cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Consumer that records every message it accepts.
fn recording_consumer(
    log: Arc<Mutex<Vec<LumberjackMessage>>>,
) -> impl MessageConsumer {
    consumer_fn(move |message| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(message);
            true
        }
    })
}

async fn start_server(consumer: impl MessageConsumer) -> Server {
    init_tracing();
    Server::builder()
        .bind("127.0.0.1", 0)
        .consumer(consumer)
        .start()
        .await
        .unwrap()
}

async fn read_ack(stream: &mut TcpStream) -> (u8, u32) {
    let mut buf = [0u8; 6];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf[1], b'A', "expected an ack frame");
    (buf[0], u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]))
}

/// Assert that nothing else arrives on the stream for a short while.
async fn assert_quiet(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_millis(100), stream.read(&mut buf)).await;
    assert!(read.is_err(), "unexpected bytes on the wire");
}

/// Client sends Window{2} then two Data events; exactly one Ack{2} comes
/// back and sequence 1 is never acked individually.
#[tokio::test]
async fn test_windowed_batch_acks_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server = start_server(recording_consumer(log.clone())).await;

    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut bytes = encode_window(VERSION_2, 2).to_vec();
    bytes.extend(encode_data(VERSION_2, 1, &[("msg", "hello")]));
    bytes.extend(encode_data(VERSION_2, 2, &[("msg", "world")]));
    client.write_all(&bytes).await.unwrap();

    assert_eq!(read_ack(&mut client).await, (VERSION_2, 2));
    assert_quiet(&mut client).await;

    let seen = log.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].sequence, 1);
    assert_eq!(
        seen[0].payload,
        MessagePayload::Fields(vec![("msg".into(), "hello".into())])
    );
    assert_eq!(seen[1].sequence, 2);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_json_events_roundtrip() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server = start_server(recording_consumer(log.clone())).await;

    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
    let payload = serde_json::to_vec(&json!({"level": "info", "msg": "up"})).unwrap();
    let mut bytes = encode_window(VERSION_2, 1).to_vec();
    bytes.extend(encode_json(VERSION_2, 1, &payload));
    client.write_all(&bytes).await.unwrap();

    assert_eq!(read_ack(&mut client).await, (VERSION_2, 1));

    let seen = log.lock().unwrap().clone();
    assert_eq!(
        seen[0].payload,
        MessagePayload::Json(json!({"level": "info", "msg": "up"}))
    );

    server.shutdown().await.unwrap();
}

/// A compressed batch behaves exactly like its uncompressed contents.
#[tokio::test]
async fn test_compressed_batch() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server = start_server(recording_consumer(log.clone())).await;

    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut inner = encode_window(VERSION_2, 3).to_vec();
    for seq in 1..=3u32 {
        inner.extend(encode_data(VERSION_2, seq, &[("n", &seq.to_string())]));
    }
    let compressed = encode_compressed(VERSION_2, &inner).unwrap();
    client.write_all(&compressed).await.unwrap();

    assert_eq!(read_ack(&mut client).await, (VERSION_2, 3));

    let sequences: Vec<u32> = log.lock().unwrap().iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, [1, 2, 3]);

    server.shutdown().await.unwrap();
}

/// Frames trickling in one byte at a time decode identically.
#[tokio::test]
async fn test_fragmented_writes() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server = start_server(recording_consumer(log.clone())).await;

    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut bytes = encode_window(VERSION_1, 1).to_vec();
    bytes.extend(encode_data(VERSION_1, 1, &[("msg", "drip")]));

    for byte in bytes {
        client.write_all(&[byte]).await.unwrap();
        client.flush().await.unwrap();
    }

    assert_eq!(read_ack(&mut client).await, (VERSION_1, 1));

    server.shutdown().await.unwrap();
}

/// A V2 frame after a V1 frame is fatal: the server closes the connection.
#[tokio::test]
async fn test_version_switch_closes_connection() {
    let server = start_server(consumer_fn(|_| async { true })).await;

    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut bytes = encode_window(VERSION_1, 5).to_vec();
    bytes.extend(encode_window(VERSION_2, 5));
    client.write_all(&bytes).await.unwrap();

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("server should close the connection")
        .unwrap();
    assert_eq!(n, 0, "expected EOF, not data");

    server.shutdown().await.unwrap();
}

/// An unknown type byte is fatal for the connection but not for the server.
#[tokio::test]
async fn test_unknown_frame_type_closes_connection_only() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server = start_server(recording_consumer(log.clone())).await;

    let mut bad = TcpStream::connect(server.local_addr()).await.unwrap();
    bad.write_all(&[VERSION_2, b'Z', 0, 0, 0, 0]).await.unwrap();
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), bad.read(&mut buf))
        .await
        .expect("server should close the bad connection")
        .unwrap();
    assert_eq!(n, 0);

    // A fresh connection still works.
    let mut good = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut bytes = encode_window(VERSION_2, 1).to_vec();
    bytes.extend(encode_data(VERSION_2, 1, &[("msg", "ok")]));
    good.write_all(&bytes).await.unwrap();
    assert_eq!(read_ack(&mut good).await, (VERSION_2, 1));

    server.shutdown().await.unwrap();
}

/// Once the consumer rejects a message the connection closes and nothing
/// sent afterwards reaches the consumer.
#[tokio::test]
async fn test_consumer_failure_closes_connection() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let consumer = consumer_fn(move |message: LumberjackMessage| {
        let seen = seen_clone.clone();
        async move {
            seen.lock().unwrap().push(message.sequence);
            false
        }
    });
    let server = start_server(consumer).await;

    let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut bytes = encode_window(VERSION_2, 10).to_vec();
    bytes.extend(encode_data(VERSION_2, 5, &[("msg", "doomed")]));
    client.write_all(&bytes).await.unwrap();

    // The server closes the connection instead of acking.
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("server should close the connection")
        .unwrap();
    assert_eq!(n, 0);

    // Anything sent after the close never reaches the consumer.
    let _ = client
        .write_all(&encode_data(VERSION_2, 6, &[("msg", "late")]))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(seen.lock().unwrap().clone(), vec![5]);

    server.shutdown().await.unwrap();
}

/// Connections from several clients are decoded independently.
#[tokio::test]
async fn test_multiple_connections() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let server = start_server(recording_consumer(log.clone())).await;

    let mut clients = Vec::new();
    for i in 0..4u32 {
        let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut bytes = encode_window(VERSION_2, 1).to_vec();
        bytes.extend(encode_data(VERSION_2, 1, &[("client", &i.to_string())]));
        client.write_all(&bytes).await.unwrap();
        clients.push(client);
    }

    for client in &mut clients {
        assert_eq!(read_ack(client).await, (VERSION_2, 1));
    }

    assert_eq!(log.lock().unwrap().len(), 4);

    server.shutdown().await.unwrap();
}

/// Shutdown with clients connected stops accepting and closes them.
#[tokio::test]
async fn test_shutdown_closes_open_connections() {
    let server = start_server(consumer_fn(|_| async { true })).await;
    let addr = server.local_addr();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(&encode_window(VERSION_2, 1))
        .await
        .unwrap();

    server.shutdown().await.unwrap();

    // The open connection is gone.
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("connection should be closed")
        .unwrap();
    assert_eq!(n, 0);

    // And the listener no longer accepts.
    let connect = TcpStream::connect(addr).await;
    assert!(connect.is_err(), "listener still accepting after shutdown");
}
