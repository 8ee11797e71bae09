//! Subscription Wire Protocol Tests
//!
//! End-to-end over a real WebSocket: handshake, start/data/stop/complete
//! ordering, fan-out across connections, protocol-error close paths, and
//! keepalive emission.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use murmur::bus::{Event, EventBus, Publisher, Topic};
use murmur::config::ServerConfig;
use murmur::engine::SubscriptionEngine;
use murmur::model::MessageRecord;
use murmur::schema::SubscriptionSchema;
use murmur::server::WebSocketServer;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Helper Functions
// =============================================================================

struct TestServer {
    addr: std::net::SocketAddr,
    bus: Arc<EventBus>,
    publisher: Publisher,
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn spawn_server(config: ServerConfig) -> TestServer {
    let bus = Arc::new(EventBus::new());
    let (publisher, subscriber) = murmur::bus::split(&bus);
    let engine = Arc::new(SubscriptionEngine::new(
        subscriber,
        Arc::new(SubscriptionSchema::builtin()),
        config.max_subscriptions_per_connection,
    ));

    let server = WebSocketServer::bind(&config, engine).await.unwrap();
    let addr = server.local_addr();
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    TestServer {
        addr,
        bus,
        publisher,
        handle,
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    }
}

async fn client(server: &TestServer) -> Client {
    let (ws, _) = connect_async(format!("ws://{}", server.addr)).await.unwrap();
    ws
}

async fn send(ws: &mut Client, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Next JSON frame from the server, skipping transport-level messages.
/// Panics if the connection ends first.
async fn next_frame(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection ended while waiting for frame")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

/// Drive the connection until it ends, returning the JSON frames seen.
async fn read_until_close(ws: &mut Client) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for close");
        match msg {
            Some(Ok(Message::Text(text))) => frames.push(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | None => return frames,
            Some(Ok(_)) => continue,
            Some(Err(_)) => return frames,
        }
    }
}

async fn init(ws: &mut Client) {
    send(ws, json!({"type": "init"})).await;
    let ack = next_frame(ws).await;
    assert_eq!(ack["type"], "init_ack");
}

async fn start_message_added(ws: &mut Client, id: &str, group_ids: Value) {
    send(
        ws,
        json!({
            "type": "start",
            "id": id,
            "payload": {
                "query": "subscription OnMessage($groupIds: [Int]) { messageAdded(groupIds: $groupIds) { id groupId text } }",
                "variables": {"groupIds": group_ids}
            }
        }),
    )
    .await;
}

/// Wait until the bus reports `count` handlers on a topic.
async fn await_handlers(bus: &EventBus, topic: Topic, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while bus.handler_count(topic) != count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "handler count never reached {}",
            count
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn test_handshake_start_data_stop_complete() {
    let server = spawn_server(test_config()).await;
    let mut ws = client(&server).await;

    init(&mut ws).await;

    start_message_added(&mut ws, "s1", json!([7])).await;
    await_handlers(&server.bus, Topic::MessageAdded, 1).await;

    server
        .publisher
        .publish(&Event::message_added(MessageRecord::new(100, 7, "hi")));

    let data = next_frame(&mut ws).await;
    assert_eq!(data["type"], "data");
    assert_eq!(data["id"], "s1");
    assert_eq!(data["payload"], json!({"id": 100, "groupId": 7, "text": "hi"}));

    send(&mut ws, json!({"type": "stop", "id": "s1"})).await;
    let complete = next_frame(&mut ws).await;
    assert_eq!(complete["type"], "complete");
    assert_eq!(complete["id"], "s1");

    await_handlers(&server.bus, Topic::MessageAdded, 0).await;

    send(&mut ws, json!({"type": "terminate"})).await;
    let rest = read_until_close(&mut ws).await;
    assert!(rest.iter().all(|f| f["type"] != "data"));
}

#[tokio::test]
async fn test_fanout_across_connections() {
    let server = spawn_server(test_config()).await;
    let mut a = client(&server).await;
    let mut b = client(&server).await;

    init(&mut a).await;
    init(&mut b).await;

    start_message_added(&mut a, "sub-a", json!([7])).await;
    start_message_added(&mut b, "sub-b", json!([7])).await;
    await_handlers(&server.bus, Topic::MessageAdded, 2).await;

    server
        .publisher
        .publish(&Event::message_added(MessageRecord::new(100, 7, "hi")));

    let frame_a = next_frame(&mut a).await;
    let frame_b = next_frame(&mut b).await;

    assert_eq!(frame_a["id"], "sub-a");
    assert_eq!(frame_b["id"], "sub-b");
    assert_eq!(frame_a["payload"], frame_b["payload"]);
}

#[tokio::test]
async fn test_filtered_event_not_delivered() {
    let server = spawn_server(test_config()).await;
    let mut ws = client(&server).await;

    init(&mut ws).await;
    start_message_added(&mut ws, "s1", json!([7])).await;
    await_handlers(&server.bus, Topic::MessageAdded, 1).await;

    server
        .publisher
        .publish(&Event::message_added(MessageRecord::new(101, 9, "no")));
    server
        .publisher
        .publish(&Event::message_added(MessageRecord::new(102, 7, "yes")));

    // Only the matching event arrives; the rejected one left no frame.
    let data = next_frame(&mut ws).await;
    assert_eq!(data["payload"]["id"], 102);
}

#[tokio::test]
async fn test_disconnect_detaches_handlers() {
    let server = spawn_server(test_config()).await;
    let mut ws = client(&server).await;

    init(&mut ws).await;
    start_message_added(&mut ws, "s1", json!([7])).await;
    start_message_added(&mut ws, "s2", json!([9])).await;
    await_handlers(&server.bus, Topic::MessageAdded, 2).await;

    drop(ws);

    await_handlers(&server.bus, Topic::MessageAdded, 0).await;
}

// =============================================================================
// Error Paths
// =============================================================================

#[tokio::test]
async fn test_malformed_first_frame_closes() {
    let server = spawn_server(test_config()).await;
    let mut ws = client(&server).await;

    ws.send(Message::Text("not json".to_string())).await.unwrap();

    let frames = read_until_close(&mut ws).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "init_err");
}

#[tokio::test]
async fn test_start_before_init_closes() {
    let server = spawn_server(test_config()).await;
    let mut ws = client(&server).await;

    send(
        &mut ws,
        json!({"type": "start", "id": "s1", "payload": {"query": "subscription { messageAdded { id } }"}}),
    )
    .await;

    let frames = read_until_close(&mut ws).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "init_err");
}

#[tokio::test]
async fn test_duplicate_init_closes_with_session_error() {
    let server = spawn_server(test_config()).await;
    let mut ws = client(&server).await;

    init(&mut ws).await;
    send(&mut ws, json!({"type": "init"})).await;

    let frames = read_until_close(&mut ws).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "error");
    assert!(frames[0].get("id").is_none());
    assert_eq!(frames[0]["payload"]["kind"], "PROTOCOL_ERROR");
}

#[tokio::test]
async fn test_subscription_error_does_not_close_connection() {
    let server = spawn_server(test_config()).await;
    let mut ws = client(&server).await;

    init(&mut ws).await;

    send(
        &mut ws,
        json!({
            "type": "start",
            "id": "bad",
            "payload": {"query": "subscription { userAdded { id } }"}
        }),
    )
    .await;

    let error = next_frame(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["id"], "bad");
    assert_eq!(error["payload"]["kind"], "UNKNOWN_SUBSCRIPTION");

    // The session is still usable.
    start_message_added(&mut ws, "good", json!([7])).await;
    await_handlers(&server.bus, Topic::MessageAdded, 1).await;

    server
        .publisher
        .publish(&Event::message_added(MessageRecord::new(1, 7, "still alive")));
    let data = next_frame(&mut ws).await;
    assert_eq!(data["id"], "good");
}

// =============================================================================
// Keepalive
// =============================================================================

#[tokio::test]
async fn test_keepalive_emitted_once_initialized() {
    let config = ServerConfig {
        keepalive_interval_secs: 1,
        ..test_config()
    };
    let server = spawn_server(config).await;
    let mut ws = client(&server).await;

    init(&mut ws).await;

    let frame = next_frame(&mut ws).await;
    assert_eq!(frame["type"], "keepalive");
}
