use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::RedisError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration};
use tokio_util::codec::Framed;

use minidis::codec::FrameCodec;
use minidis::config::Config;
use minidis::frame::Frame;
use minidis::server::serve;
use minidis::store::Store;

const PING: &[u8] = b"*1\r\n$4\r\nPING\r\n";
const PONG: &[u8] = b"$4\r\nPONG\r\n";

async fn start(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(serve(listener, Store::new(), config));

    addr
}

async fn start_default() -> SocketAddr {
    start(Config::default()).await
}

/// The `redis` client sends `CLIENT SETINFO` on connect and waits for the replies, even though it
/// ignores what they say.
async fn start_for_client() -> SocketAddr {
    start(Config {
        reply_unknown_commands: true,
        ..Config::default()
    })
    .await
}

/// Sends `request` and checks that exactly `expected` comes back.
async fn assert_reply(stream: &mut TcpStream, request: &[u8], expected: &[u8]) {
    stream.write_all(request).await.unwrap();

    let mut actual = vec![0; expected.len()];
    timeout(Duration::from_secs(5), stream.read_exact(&mut actual))
        .await
        .expect("timed out waiting for a reply")
        .unwrap();

    assert_eq!(
        String::from_utf8_lossy(&actual),
        String::from_utf8_lossy(expected)
    );
}

async fn connect(addr: SocketAddr) -> Result<MultiplexedConnection, RedisError> {
    let client = redis::Client::open(format!("redis://{}/", addr))?;
    client.get_multiplexed_async_connection().await
}

#[tokio::test]
async fn test_ping() {
    let addr = start_default().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_reply(&mut stream, PING, PONG).await;
}

#[tokio::test]
async fn test_echo() {
    let addr = start_default().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_reply(
        &mut stream,
        b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n",
        b"$5\r\nhello\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_set_and_get() {
    let addr = start_default().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_reply(
        &mut stream,
        b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n",
        b"+OK\r\n",
    )
    .await;
    assert_reply(
        &mut stream,
        b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n",
        b"$3\r\nbar\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_get_missing_key() {
    let addr = start_default().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_reply(
        &mut stream,
        b"*2\r\n$3\r\nGET\r\n$7\r\nmissing\r\n",
        b"$-1\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_command_names_ignore_case() {
    let addr = start_default().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    for (name, value) in [("set", "a"), ("SET", "b"), ("SeT", "c")] {
        let request = format!(
            "*3\r\n$3\r\n{}\r\n$3\r\nkey\r\n$1\r\n{}\r\n",
            name, value
        );
        assert_reply(&mut stream, request.as_bytes(), b"+OK\r\n").await;

        let expected = format!("$1\r\n{}\r\n", value);
        assert_reply(
            &mut stream,
            b"*2\r\n$3\r\nget\r\n$3\r\nkey\r\n",
            expected.as_bytes(),
        )
        .await;
    }
}

#[tokio::test]
async fn test_request_split_across_writes() {
    let addr = start_default().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"*2\r\n$4\r\nEC").await.unwrap();
    sleep(Duration::from_millis(50)).await;
    stream.write_all(b"HO\r\n$2\r\n\r").await.unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_reply(&mut stream, b"\n\r\n", b"$2\r\n\r\n\r\n").await;
}

#[tokio::test]
async fn test_unknown_command_is_dropped() {
    let addr = start_default().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"*1\r\n$8\r\nFLUSHALL\r\n").await.unwrap();

    // The only reply on the wire is the one for the PING.
    assert_reply(&mut stream, PING, PONG).await;
}

#[tokio::test]
async fn test_unknown_command_with_reply() {
    let addr = start_for_client().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    assert_reply(
        &mut stream,
        b"*1\r\n$8\r\nFLUSHALL\r\n",
        b"-ERR unknown command 'FLUSHALL'\r\n",
    )
    .await;
    assert_reply(&mut stream, PING, PONG).await;
}

#[tokio::test]
async fn test_invalid_command_gets_an_error_reply() {
    let addr = start_default().await;
    let mut framed = Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec::default());

    // Not an array.
    framed.send(Frame::Bulk(Bytes::from("PING"))).await.unwrap();
    let reply = framed.next().await.unwrap().unwrap();
    assert!(matches!(reply, Frame::Error(ref msg) if msg.starts_with("ERR protocol error")));

    // Missing argument.
    framed
        .send(Frame::Array(vec![Frame::Bulk(Bytes::from("GET"))]))
        .await
        .unwrap();
    let reply = framed.next().await.unwrap().unwrap();
    assert!(matches!(reply, Frame::Error(ref msg) if msg.starts_with("ERR protocol error")));

    // The connection is still usable.
    framed
        .send(Frame::Array(vec![Frame::Bulk(Bytes::from("PING"))]))
        .await
        .unwrap();
    let reply = framed.next().await.unwrap().unwrap();
    assert_eq!(reply, Frame::Bulk(Bytes::from("PONG")));
}

#[tokio::test]
async fn test_malformed_frame_only_closes_that_connection() {
    let addr = start_default().await;
    let mut bystander = TcpStream::connect(addr).await.unwrap();
    assert_reply(&mut bystander, PING, PONG).await;

    let mut offender = TcpStream::connect(addr).await.unwrap();
    offender.write_all(b"*1\r\n:abc\r\n").await.unwrap();

    let mut buf = [0; 16];
    let res = timeout(Duration::from_secs(5), offender.read(&mut buf))
        .await
        .expect("connection was not closed");
    assert!(matches!(res, Ok(0) | Err(_)));

    assert_reply(&mut bystander, PING, PONG).await;

    let mut newcomer = TcpStream::connect(addr).await.unwrap();
    assert_reply(&mut newcomer, PING, PONG).await;
}

#[tokio::test]
async fn test_oversized_declared_length_closes_the_connection() {
    let addr = start(Config {
        max_frame_size: 1024,
        ..Config::default()
    })
    .await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // Only the header is sent, the payload never arrives.
    stream
        .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$600000000\r\n")
        .await
        .unwrap();

    let mut buf = [0; 16];
    let res = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("connection was not closed");
    assert!(matches!(res, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_admission_gate() {
    let addr = start(Config {
        max_connections: 1,
        ..Config::default()
    })
    .await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    assert_reply(&mut first, PING, PONG).await;

    // The TCP handshake completes through the listen backlog, but nobody serves this client yet.
    let mut second = TcpStream::connect(addr).await.unwrap();
    second.write_all(PING).await.unwrap();

    let mut buf = vec![0; PONG.len()];
    let waited = timeout(Duration::from_millis(300), second.read_exact(&mut buf)).await;
    assert!(waited.is_err(), "second client was served while the first was connected");

    drop(first);

    timeout(Duration::from_secs(5), second.read_exact(&mut buf))
        .await
        .expect("second client was never served")
        .unwrap();
    assert_eq!(&buf[..], PONG);
}

#[tokio::test]
async fn test_set_px_expires() {
    let addr = start_for_client().await;
    let mut con = connect(addr).await.unwrap();

    let _: () = redis::cmd("SET")
        .arg("expiring")
        .arg("v")
        .arg("PX")
        .arg(100)
        .query_async(&mut con)
        .await
        .unwrap();
    let _: () = redis::cmd("SET")
        .arg("lasting")
        .arg("v")
        .query_async(&mut con)
        .await
        .unwrap();

    let value: Option<String> = redis::cmd("GET")
        .arg("expiring")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some("v"));

    sleep(Duration::from_millis(150)).await;

    let value: Option<String> = redis::cmd("GET")
        .arg("expiring")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!(value, None);

    let value: Option<String> = redis::cmd("GET")
        .arg("lasting")
        .query_async(&mut con)
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some("v"));
}

#[tokio::test]
async fn test_overwrite_clears_expiry() {
    let addr = start_for_client().await;
    let mut con = connect(addr).await.unwrap();

    let _: () = redis::cmd("SET")
        .arg("k")
        .arg("v1")
        .arg("PX")
        .arg(100)
        .query_async(&mut con)
        .await
        .unwrap();
    let _: () = redis::cmd("SET")
        .arg("k")
        .arg("v2")
        .query_async(&mut con)
        .await
        .unwrap();

    sleep(Duration::from_millis(150)).await;

    let value: Option<String> = redis::cmd("GET").arg("k").query_async(&mut con).await.unwrap();
    assert_eq!(value.as_deref(), Some("v2"));
}

#[tokio::test]
async fn test_binary_values() {
    let addr = start_for_client().await;
    let mut con = connect(addr).await.unwrap();

    let mut value = vec![0u8; 4096];
    rand::thread_rng().fill(&mut value[..]);
    value[100..102].copy_from_slice(b"\r\n");
    let key = b"bin\r\nkey\x00".to_vec();

    let _: () = redis::cmd("SET")
        .arg(&key)
        .arg(&value)
        .query_async(&mut con)
        .await
        .unwrap();

    let stored: Vec<u8> = redis::cmd("GET").arg(&key).query_async(&mut con).await.unwrap();
    assert_eq!(stored, value);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients() {
    let addr = start_for_client().await;
    let n = 32;

    let writers: Vec<_> = (0..n)
        .map(|i| {
            tokio::spawn(async move {
                let mut con = connect(addr).await.unwrap();
                let _: () = redis::cmd("SET")
                    .arg(format!("key_{}", i))
                    .arg(format!("value_{}", i))
                    .query_async(&mut con)
                    .await
                    .unwrap();
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    let readers: Vec<_> = (0..n)
        .map(|i| {
            tokio::spawn(async move {
                let mut con = connect(addr).await.unwrap();
                let value: Option<String> = redis::cmd("GET")
                    .arg(format!("key_{}", i))
                    .query_async(&mut con)
                    .await
                    .unwrap();
                (i, value)
            })
        })
        .collect();
    for reader in readers {
        let (i, value) = reader.await.unwrap();
        assert_eq!(value, Some(format!("value_{}", i)));
    }
}
