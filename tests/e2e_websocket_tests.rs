//! End-to-end tests for realtime delivery over WebSocket

mod common;

use common::{TestClient, TestServer, ECHO_JOB, OTHER_USER_ID, TEST_USER_ID};
use futures::{SinkExt, StreamExt};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::Error as WsError, tungstenite::Message, MaybeTlsStream,
    WebSocketStream,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect_ws(server: &TestServer, user_id: u64) -> Ws {
    let (ws, _) = connect_async(server.ws_url(&server.token_for(user_id)))
        .await
        .expect("Failed to connect to WebSocket");
    ws
}

/// Next JSON text message, skipping control frames.
async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for a message")
            .expect("WebSocket closed")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("Invalid JSON from server");
        }
    }
}

/// Connect and consume the `connected` welcome.
async fn connect_ready(server: &TestServer, user_id: u64) -> Ws {
    let mut ws = connect_ws(server, user_id).await;
    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "connected");
    ws
}

#[tokio::test]
async fn test_connected_welcome() {
    let server = TestServer::spawn().await;
    let mut ws = connect_ws(&server, TEST_USER_ID).await;

    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "connected");
    assert_eq!(welcome["payload"]["user_id"], TEST_USER_ID);
    assert!(!welcome["payload"]["client_id"].as_str().unwrap().is_empty());
    assert!(!welcome["payload"]["server_version"]
        .as_str()
        .unwrap()
        .is_empty());
    assert!(welcome["timestamp"].as_str().unwrap().ends_with('Z'));
    assert!(welcome.get("user_id").is_none());

    assert_eq!(server.hub.get_active_connections(TEST_USER_ID), 1);
}

#[tokio::test]
async fn test_bad_token_is_rejected_before_upgrade() {
    let server = TestServer::spawn().await;

    for url in [
        server.ws_url("garbage"),
        format!("{}/v1/ws", server.base_url.replace("http://", "ws://")),
    ] {
        match connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("upgrade should have been rejected"),
        }
    }
    assert_eq!(server.hub.total_connections(), 0);
}

#[tokio::test]
async fn test_ping_pong() {
    let server = TestServer::spawn().await;
    let mut ws = connect_ready(&server, TEST_USER_ID).await;

    ws.send(Message::Text(r#"{"type":"ping"}"#.into()))
        .await
        .unwrap();

    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "pong");
}

#[tokio::test]
async fn test_invalid_client_messages_get_errors() {
    let server = TestServer::spawn().await;
    let mut ws = connect_ready(&server, TEST_USER_ID).await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["code"], "parse_error");

    ws.send(Message::Text(r#"{"type":"task.create"}"#.into()))
        .await
        .unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["code"], "unknown_type");
}

#[tokio::test]
async fn test_published_event_reaches_only_target_user() {
    let server = TestServer::spawn().await;
    let mut target = connect_ready(&server, TEST_USER_ID).await;
    let mut other = connect_ready(&server, OTHER_USER_ID).await;

    server
        .broadcaster
        .publish(TEST_USER_ID, "task.created", json!({"task_id": 42}));
    // Published after the task event on the same hub channel, so it arrives
    // second at any client that would have received both.
    server
        .broadcaster
        .publish(OTHER_USER_ID, "notification", json!({"text": "marker"}));

    let event = next_json(&mut target).await;
    assert_eq!(event["type"], "task.created");
    assert_eq!(event["payload"], json!({"task_id": 42}));

    let first_for_other = next_json(&mut other).await;
    assert_eq!(first_for_other["type"], "notification");
}

#[tokio::test]
async fn test_every_connection_of_a_user_receives_events() {
    let server = TestServer::spawn().await;
    let mut phone = connect_ready(&server, TEST_USER_ID).await;
    let mut laptop = connect_ready(&server, TEST_USER_ID).await;
    assert_eq!(server.hub.get_active_connections(TEST_USER_ID), 2);
    assert_eq!(server.hub.room_count(), 1);

    server
        .broadcaster
        .publish(TEST_USER_ID, "habit.completed", json!({"habit_id": 1}));

    assert_eq!(next_json(&mut phone).await["type"], "habit.completed");
    assert_eq!(next_json(&mut laptop).await["type"], "habit.completed");
}

#[tokio::test]
async fn test_triggered_job_streams_lifecycle_events() {
    let server = TestServer::spawn().await;
    let mut ws = connect_ready(&server, OTHER_USER_ID).await;
    let client = TestClient::authenticated(&server);

    let response = client.trigger_job(ECHO_JOB).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    let execution_id = body["execution_id"].clone();

    let started = next_json(&mut ws).await;
    assert_eq!(started["type"], "job.started");
    assert_eq!(started["payload"]["job_name"], ECHO_JOB);
    assert_eq!(started["payload"]["execution_id"], execution_id);

    let progress = next_json(&mut ws).await;
    assert_eq!(progress["type"], "job.progress");
    assert_eq!(progress["payload"]["percent"], 50);
    assert_eq!(progress["payload"]["message"], "halfway");

    let completed = next_json(&mut ws).await;
    assert_eq!(completed["type"], "job.completed");
    assert_eq!(completed["payload"]["attempts"], 1);
}

#[tokio::test]
async fn test_disconnect_removes_room() {
    let server = TestServer::spawn().await;
    let mut ws = connect_ready(&server, TEST_USER_ID).await;
    assert_eq!(server.hub.room_count(), 1);

    ws.close(None).await.unwrap();

    for _ in 0..100 {
        if server.hub.room_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.hub.room_count(), 0);
    assert_eq!(server.hub.total_connections(), 0);
}
