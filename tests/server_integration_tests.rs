//! Integration Tests for the Connection Server
//!
//! Boots the full server on an ephemeral port and speaks raw RESP over
//! TCP, covering the externally observable command semantics, pipelining,
//! error replies and connection teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify, RwLock};

use hpcs::cache::{CacheStore, PolicyKind};
use hpcs::cluster::Cluster;
use hpcs::config::Config;
use hpcs::metrics::ServerMetrics;
use hpcs::protocol::{CommandHandler, Parser, Value};
use hpcs::server::Server;
use hpcs::tasks::spawn_cleanup_task;

// == Helper Functions ==

struct TestServer {
    addr: String,
    shutdown: watch::Sender<bool>,
}

/// Boots a complete server (store, maintenance task, dispatcher, accept
/// loop) on an ephemeral port.
async fn start_server(policy: PolicyKind, max_memory: &str) -> TestServer {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0; // ephemeral
    config.cache.max_memory = max_memory.to_string();
    config.cache.eviction_policy = policy;
    config.metrics.enabled = false;

    let config = Arc::new(config);
    let cache = Arc::new(RwLock::new(CacheStore::new(
        config.cache.max_memory_bytes(),
        config.cache.eviction_policy,
    )));
    let metrics = Arc::new(ServerMetrics::new());
    let pressure = Arc::new(Notify::new());
    let cluster = Arc::new(Cluster::new(
        &config.server.listen_addr(),
        config.cluster.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    spawn_cleanup_task(
        cache.clone(),
        config.cache.cleanup_interval(),
        pressure.clone(),
        shutdown_rx.clone(),
    );

    let handler = Arc::new(CommandHandler::new(cache, cluster, metrics.clone(), pressure));
    let server = Server::bind(config, handler, metrics)
        .await
        .expect("bind test server");
    let addr = server.local_addr().expect("local addr").to_string();

    tokio::spawn(server.run(shutdown_rx));

    TestServer {
        addr,
        shutdown: shutdown_tx,
    }
}

struct Client {
    parser: Parser<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read_half, writer) = stream.into_split();
        Self {
            parser: Parser::new(BufReader::new(read_half)),
            writer,
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write");
    }

    async fn send(&mut self, parts: &[&[u8]]) {
        let frame = Value::Array(parts.iter().map(|p| Value::bulk(p.to_vec())).collect());
        self.send_raw(&frame.marshal()).await;
    }

    async fn recv(&mut self) -> Option<Value> {
        self.parser.parse().await.expect("parse reply")
    }

    async fn roundtrip(&mut self, parts: &[&[u8]]) -> Value {
        self.send(parts).await;
        self.recv().await.expect("reply")
    }
}

fn info_field(body: &Value, field: &str) -> Option<u64> {
    let Value::Bulk(bytes) = body else {
        panic!("INFO must reply with a bulk string");
    };
    let text = String::from_utf8(bytes.clone()).unwrap();
    text.lines()
        .find_map(|line| line.trim_end().strip_prefix(&format!("{field}:")))
        .and_then(|value| value.parse().ok())
}

// == Basic Commands ==

#[tokio::test]
async fn test_set_then_get() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    assert_eq!(
        client.roundtrip(&[b"SET", b"foo", b"bar"]).await,
        Value::simple("OK")
    );
    assert_eq!(
        client.roundtrip(&[b"GET", b"foo"]).await,
        Value::bulk(*b"bar")
    );
}

#[tokio::test]
async fn test_get_miss_replies_nil() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    assert_eq!(client.roundtrip(&[b"GET", b"absent"]).await, Value::Null);
}

#[tokio::test]
async fn test_stored_empty_string_is_not_nil() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    client.roundtrip(&[b"SET", b"empty", b""]).await;
    assert_eq!(
        client.roundtrip(&[b"GET", b"empty"]).await,
        Value::Bulk(Vec::new())
    );
}

#[tokio::test]
async fn test_binary_keys_roundtrip() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    // non-UTF-8 keys differing in one byte stay distinct
    client.roundtrip(&[b"SET", b"\xff", b"one"]).await;
    client.roundtrip(&[b"SET", b"\xfe", b"two"]).await;
    assert_eq!(
        client.roundtrip(&[b"GET", b"\xff"]).await,
        Value::bulk(*b"one")
    );
    assert_eq!(
        client.roundtrip(&[b"GET", b"\xfe"]).await,
        Value::bulk(*b"two")
    );
    assert_eq!(
        client.roundtrip(&[b"DEL", b"\xff"]).await,
        Value::Integer(1)
    );
    assert_eq!(
        client.roundtrip(&[b"GET", b"\xfe"]).await,
        Value::bulk(*b"two")
    );
}

#[tokio::test]
async fn test_ttl_expiry() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    assert_eq!(
        client.roundtrip(&[b"SET", b"k", b"v", b"EX", b"1"]).await,
        Value::simple("OK")
    );
    assert_eq!(client.roundtrip(&[b"GET", b"k"]).await, Value::bulk(*b"v"));

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(client.roundtrip(&[b"GET", b"k"]).await, Value::Null);
    assert_eq!(
        client.roundtrip(&[b"EXISTS", b"k"]).await,
        Value::Integer(0)
    );
}

#[tokio::test]
async fn test_del_multiple_counts_existing() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    client.roundtrip(&[b"SET", b"a", b"1"]).await;
    client.roundtrip(&[b"SET", b"b", b"2"]).await;
    assert_eq!(
        client.roundtrip(&[b"DEL", b"a", b"b", b"c"]).await,
        Value::Integer(2)
    );
}

#[tokio::test]
async fn test_keys_glob() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    client.roundtrip(&[b"SET", b"user:1", b"x"]).await;
    client.roundtrip(&[b"SET", b"user:2", b"y"]).await;
    client.roundtrip(&[b"SET", b"other", b"z"]).await;

    let Value::Array(matched) = client.roundtrip(&[b"KEYS", b"user:*"]).await else {
        panic!("KEYS must reply with an array");
    };
    let mut keys: Vec<String> = matched
        .into_iter()
        .map(|value| match value {
            Value::Bulk(bytes) => String::from_utf8(bytes).unwrap(),
            other => panic!("unexpected element {other:?}"),
        })
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["user:1", "user:2"]);
}

#[tokio::test]
async fn test_flushall_empties_keyspace() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    client.roundtrip(&[b"SET", b"a", b"1"]).await;
    assert_eq!(
        client.roundtrip(&[b"FLUSHALL"]).await,
        Value::simple("OK")
    );
    assert_eq!(client.roundtrip(&[b"GET", b"a"]).await, Value::Null);
    let info = client.roundtrip(&[b"INFO"]).await;
    assert_eq!(info_field(&info, "used_memory"), Some(0));
}

#[tokio::test]
async fn test_ping() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    assert_eq!(client.roundtrip(&[b"PING"]).await, Value::simple("PONG"));
    assert_eq!(
        client.roundtrip(&[b"PING", b"echo"]).await,
        Value::bulk(*b"echo")
    );
}

#[tokio::test]
async fn test_info_reports_hits_and_misses() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    client.roundtrip(&[b"SET", b"a", b"12345"]).await;
    client.roundtrip(&[b"GET", b"a"]).await;
    client.roundtrip(&[b"GET", b"missing"]).await;

    let info = client.roundtrip(&[b"INFO"]).await;
    assert_eq!(info_field(&info, "used_memory"), Some(5));
    assert_eq!(info_field(&info, "keyspace_hits"), Some(1));
    assert_eq!(info_field(&info, "keyspace_misses"), Some(1));
    assert_eq!(info_field(&info, "connected_clients"), Some(1));
}

// == Eviction ==

#[tokio::test]
async fn test_overflow_eviction_keeps_recent_keys() {
    let server = start_server(PolicyKind::Lru, "1KB").await;
    let mut client = Client::connect(&server.addr).await;

    // 100 keys of 100 bytes each, 10x the budget
    let payload = vec![b'x'; 100];
    for i in 0..100 {
        let key = format!("key{i}");
        assert_eq!(
            client.roundtrip(&[b"SET", key.as_bytes(), &payload]).await,
            Value::simple("OK")
        );
    }

    // capacity pressure wakes the evictor without waiting for its tick
    tokio::time::sleep(Duration::from_millis(500)).await;

    let info = client.roundtrip(&[b"INFO"]).await;
    let used = info_field(&info, "used_memory").unwrap();
    assert!(used <= 1024, "used_memory {used} exceeds the budget");

    // the most recently written key survives, the oldest cannot
    assert_eq!(
        client.roundtrip(&[b"EXISTS", b"key99"]).await,
        Value::Integer(1)
    );
    assert_eq!(
        client.roundtrip(&[b"EXISTS", b"key0"]).await,
        Value::Integer(0)
    );
}

// == Pipelining and Ordering ==

#[tokio::test]
async fn test_pipelined_commands_reply_in_order() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    let mut batch = Vec::new();
    batch.extend(
        Value::Array(vec![
            Value::bulk(*b"SET"),
            Value::bulk(*b"p"),
            Value::bulk(*b"q"),
        ])
        .marshal(),
    );
    batch.extend(Value::Array(vec![Value::bulk(*b"GET"), Value::bulk(*b"p")]).marshal());
    batch.extend(Value::Array(vec![Value::bulk(*b"PING")]).marshal());
    client.send_raw(&batch).await;

    assert_eq!(client.recv().await, Some(Value::simple("OK")));
    assert_eq!(client.recv().await, Some(Value::bulk(*b"q")));
    assert_eq!(client.recv().await, Some(Value::simple("PONG")));
}

#[tokio::test]
async fn test_connections_are_isolated_by_reply_stream() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut first = Client::connect(&server.addr).await;
    let mut second = Client::connect(&server.addr).await;

    first.roundtrip(&[b"SET", b"shared", b"value"]).await;
    // both connections observe the same store
    assert_eq!(
        second.roundtrip(&[b"GET", b"shared"]).await,
        Value::bulk(*b"value")
    );
    assert_eq!(
        first.roundtrip(&[b"GET", b"shared"]).await,
        Value::bulk(*b"value")
    );
}

// == Error Handling ==

#[tokio::test]
async fn test_command_errors_are_inline_replies() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    assert_eq!(
        client.roundtrip(&[b"NOSUCH"]).await,
        Value::error("ERR unknown command 'NOSUCH'")
    );
    assert_eq!(
        client.roundtrip(&[b"GET"]).await,
        Value::error("ERR wrong number of arguments for 'get' command")
    );
    assert_eq!(
        client.roundtrip(&[b"SET", b"k", b"v", b"BOGUS"]).await,
        Value::error("ERR syntax error")
    );

    // the connection survives command errors
    assert_eq!(client.roundtrip(&[b"PING"]).await, Value::simple("PONG"));
}

#[tokio::test]
async fn test_framing_error_closes_only_that_connection() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut bad = Client::connect(&server.addr).await;
    let mut good = Client::connect(&server.addr).await;

    bad.send_raw(b"!not-a-frame\r\n").await;
    // the offending connection is torn down without a reply
    assert_eq!(bad.recv().await, None);

    // other connections keep serving
    assert_eq!(good.roundtrip(&[b"PING"]).await, Value::simple("PONG"));
}

// == Shutdown ==

#[tokio::test]
async fn test_shutdown_drains_open_connection() {
    let server = start_server(PolicyKind::Lru, "1MB").await;
    let mut client = Client::connect(&server.addr).await;

    client.roundtrip(&[b"SET", b"k", b"v"]).await;
    server.shutdown.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // in-flight connection still serves until it closes
    assert_eq!(
        client.roundtrip(&[b"GET", b"k"]).await,
        Value::bulk(*b"v")
    );
}
