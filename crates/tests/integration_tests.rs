//! Integration tests for mongoproxy
//!
//! Each test runs a real proxy on loopback between a scripted client and a
//! scripted upstream server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bson::doc;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use mongoproxy::{Document, ProxyServer};
use mongoproxy_protocol::document::decode_document;
use mongoproxy_protocol::frame::{read_frame, write_frame, Frame, OpCode};
use mongoproxy_protocol::query::OpQuery;

/// Requests with this id get half a reply, then the upstream hangs up
const TRUNCATE_REPLY_ID: i32 = 666;

const STEP: Duration = Duration::from_secs(5);

/// Deterministic reply the scripted upstream sends for `request`
fn reply_for(request: &Frame) -> Frame {
    let request_id = request.header().request_id;
    let mut body = vec![0u8; 20];
    body.extend_from_slice(&to_wire(&doc! { "ok": 1.0, "n": request_id }));
    Frame::build(request_id + 1000, request_id, OpCode::Reply, &body)
}

fn to_wire(doc: &bson::Document) -> Vec<u8> {
    let mut bytes = Vec::new();
    doc.to_writer(&mut bytes).expect("bson serialization");
    bytes
}

fn to_document(doc: &bson::Document) -> Document {
    decode_document(&to_wire(doc), 0).expect("decode")
}

fn query_frame(request_id: i32, namespace: &str, command: &bson::Document) -> Frame {
    OpQuery::build(request_id, 0, namespace, 0, -1, &to_document(command))
}

/// Scripted upstream: records every request it receives and answers it
async fn start_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<Frame>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_upstream(stream, tx.clone()));
        }
    });

    (addr, rx)
}

async fn serve_upstream(mut stream: TcpStream, seen: mpsc::UnboundedSender<Frame>) {
    while let Ok(request) = read_frame(&mut stream).await {
        let _ = seen.send(request.clone());
        if !request.expects_reply() {
            continue;
        }

        let reply = reply_for(&request);
        if request.header().request_id == TRUNCATE_REPLY_ID {
            let _ = stream.write_all(&reply.as_bytes()[..reply.len() / 2]).await;
            return;
        }
        if write_frame(&mut stream, &reply).await.is_err() {
            return;
        }
    }
}

struct Harness {
    proxy: Arc<ProxyServer>,
    proxy_addr: SocketAddr,
    upstream_seen: mpsc::UnboundedReceiver<Frame>,
}

impl Harness {
    /// Start an upstream and a proxy; `setup` registers listeners first
    async fn start(setup: impl FnOnce(&ProxyServer)) -> Self {
        let (upstream_addr, upstream_seen) = start_upstream().await;
        let proxy = ProxyServer::new(0, &upstream_addr.ip().to_string(), upstream_addr.port());
        setup(&proxy);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
        let proxy_addr = listener.local_addr().expect("proxy addr");
        let proxy = Arc::new(proxy);
        let serving = proxy.clone();
        tokio::spawn(async move { serving.serve(listener).await });

        Self {
            proxy,
            proxy_addr,
            upstream_seen,
        }
    }

    async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.proxy_addr).await.expect("connect to proxy")
    }

    async fn next_forwarded(&mut self) -> Frame {
        timeout(STEP, self.upstream_seen.recv())
            .await
            .expect("upstream timed out")
            .expect("upstream stopped")
    }
}

/// Send a request and return the reply the proxy relays back
async fn round_trip(client: &mut TcpStream, request: &Frame) -> Frame {
    write_frame(client, request).await.expect("send request");
    timeout(STEP, read_frame(client))
        .await
        .expect("reply timed out")
        .expect("read reply")
}

type Seen = Arc<Mutex<Vec<(&'static str, Document)>>>;

fn recording(proxy: &ProxyServer, seen: &Seen, tag: &'static str, database: &str, collection: &str) {
    let seen = seen.clone();
    proxy.add_listener(database, collection, move |doc| {
        seen.lock().push((tag, doc.clone()));
    });
}

// ============================================================================
// Interception
// ============================================================================

#[tokio::test]
async fn test_insert_reaches_listener_with_literal_document() {
    let seen: Seen = Arc::default();
    let mut harness = Harness::start(|proxy| recording(proxy, &seen, "users", "app", "users")).await;
    let mut client = harness.connect().await;

    let inserted = doc! {
        "_id": bson::oid::ObjectId::from_bytes([7; 12]),
        "name": "Alice",
        "age": 30i64,
        "address": { "city": "Brussels" },
    };
    let request = query_frame(
        1,
        "app.$cmd",
        &doc! { "insert": "users", "documents": [inserted.clone()], "ordered": true },
    );

    let reply = round_trip(&mut client, &request).await;
    assert_eq!(reply, reply_for(&request));
    assert_eq!(harness.next_forwarded().await.as_bytes(), request.as_bytes());

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, to_document(&inserted));
    assert_eq!(seen[0].1.get_str("name"), Some("Alice"));
}

#[tokio::test]
async fn test_listeners_run_in_registration_order() {
    let seen: Seen = Arc::default();
    let mut harness = Harness::start(|proxy| {
        recording(proxy, &seen, "first", "app", "users");
        recording(proxy, &seen, "second", "app", "users");
        recording(proxy, &seen, "other", "app", "orders");
    })
    .await;
    let mut client = harness.connect().await;

    for (id, name) in [(1, "Bob"), (2, "Carol")] {
        let request = query_frame(
            id,
            "app.$cmd",
            &doc! { "insert": "users", "documents": [{ "name": name }] },
        );
        round_trip(&mut client, &request).await;
        harness.next_forwarded().await;
    }

    let order: Vec<_> = seen
        .lock()
        .iter()
        .map(|(tag, doc)| (*tag, doc.get_str("name").map(str::to_string)))
        .collect();
    assert_eq!(
        order,
        vec![
            ("first", Some("Bob".to_string())),
            ("second", Some("Bob".to_string())),
            ("first", Some("Carol".to_string())),
            ("second", Some("Carol".to_string())),
        ]
    );
}

#[tokio::test]
async fn test_non_matching_queries_forwarded_without_dispatch() {
    let seen: Seen = Arc::default();
    let mut harness = Harness::start(|proxy| recording(proxy, &seen, "users", "app", "users")).await;
    let mut client = harness.connect().await;

    let requests = [
        // first element is not a collection name
        query_frame(1, "app.$cmd", &doc! { "count": 1i32, "documents": [{ "name": "x" }] }),
        // no documents element
        query_frame(2, "app.$cmd", &doc! { "find": "users", "filter": { "name": "x" } }),
        // documents is not a document
        query_frame(3, "app.$cmd", &doc! { "insert": "users", "documents": "x" }),
        // other database
        query_frame(4, "shop.$cmd", &doc! { "insert": "users", "documents": [{ "name": "x" }] }),
        // not a command namespace
        query_frame(5, "app.users", &doc! { "insert": "users", "documents": [{ "name": "x" }] }),
    ];

    for request in &requests {
        let reply = round_trip(&mut client, request).await;
        assert_eq!(reply, reply_for(request));
        assert_eq!(harness.next_forwarded().await.as_bytes(), request.as_bytes());
    }

    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn test_panicking_listener_does_not_break_relay() {
    let seen: Seen = Arc::default();
    let mut harness = Harness::start(|proxy| {
        proxy.add_listener("app", "users", |_| panic!("listener bug"));
        recording(proxy, &seen, "after", "app", "users");
    })
    .await;
    let mut client = harness.connect().await;

    let request = query_frame(1, "app.$cmd", &doc! { "insert": "users", "documents": [{ "n": 1i32 }] });
    let reply = round_trip(&mut client, &request).await;

    assert_eq!(reply, reply_for(&request));
    assert_eq!(harness.next_forwarded().await.as_bytes(), request.as_bytes());
    assert_eq!(seen.lock().len(), 1);
}

// ============================================================================
// Relaying
// ============================================================================

#[tokio::test]
async fn test_other_opcodes_pass_through() {
    let mut harness = Harness::start(|_| {}).await;
    let mut client = harness.connect().await;

    let reply_opcode = Frame::build(10, 0, OpCode::Reply, &[9u8; 36]);
    let reply = round_trip(&mut client, &reply_opcode).await;
    assert_eq!(reply, reply_for(&reply_opcode));
    assert_eq!(harness.next_forwarded().await, reply_opcode);

    let mut msg_body = vec![0u8; 5];
    msg_body.extend_from_slice(&to_wire(&doc! { "ping": 1i32, "$db": "admin" }));
    let msg = Frame::build(11, 0, OpCode::Msg, &msg_body);
    let reply = round_trip(&mut client, &msg).await;
    assert_eq!(reply, reply_for(&msg));
    assert_eq!(harness.next_forwarded().await, msg);
}

#[tokio::test]
async fn test_fire_and_forget_writes_get_no_reply() {
    let mut harness = Harness::start(|_| {}).await;
    let mut client = harness.connect().await;

    let legacy_insert = Frame::build(20, 0, OpCode::Insert, &[0u8; 24]);
    write_frame(&mut client, &legacy_insert).await.expect("send insert");
    assert_eq!(harness.next_forwarded().await, legacy_insert);

    // the connection keeps relaying request/response pairs afterwards
    let ping = query_frame(21, "admin.$cmd", &doc! { "ping": 1i32 });
    let reply = round_trip(&mut client, &ping).await;
    assert_eq!(reply, reply_for(&ping));
}

#[tokio::test]
async fn test_upstream_close_mid_response_only_ends_that_connection() {
    let mut harness = Harness::start(|_| {}).await;
    let mut healthy = harness.connect().await;
    let mut doomed = harness.connect().await;

    let ping = query_frame(1, "admin.$cmd", &doc! { "ping": 1i32 });
    round_trip(&mut healthy, &ping).await;
    harness.next_forwarded().await;

    let fatal = query_frame(TRUNCATE_REPLY_ID, "admin.$cmd", &doc! { "ping": 1i32 });
    write_frame(&mut doomed, &fatal).await.expect("send request");
    harness.next_forwarded().await;

    // the half reply is never relayed; the client just sees the socket close
    let outcome = timeout(STEP, read_frame(&mut doomed)).await.expect("close timed out");
    assert!(outcome.unwrap_err().is_disconnect());

    let again = query_frame(2, "admin.$cmd", &doc! { "ping": 1i32 });
    let reply = round_trip(&mut healthy, &again).await;
    assert_eq!(reply, reply_for(&again));
}

#[tokio::test]
async fn test_unreachable_upstream_closes_client() {
    let spare = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let dead_port = spare.local_addr().expect("addr").port();
    drop(spare);

    let proxy = Arc::new(ProxyServer::new(0, "127.0.0.1", dead_port));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
    let proxy_addr = listener.local_addr().expect("proxy addr");
    tokio::spawn(async move { proxy.serve(listener).await });

    let mut client = TcpStream::connect(proxy_addr).await.expect("connect");
    let outcome = timeout(STEP, read_frame(&mut client)).await.expect("close timed out");
    assert!(outcome.is_err());
}

#[tokio::test]
async fn test_registry_is_shared_with_embedder() {
    let harness = Harness::start(|proxy| {
        proxy.add_listener("app", "users", |_| {});
    })
    .await;

    let registry = harness.proxy.registry();
    assert_eq!(registry.len(), 1);

    // listeners added after start are visible to new traffic
    harness.proxy.add_listener("app", "orders", |_| {});
    assert_eq!(registry.len(), 2);
}
