//! WebSocket route handler.
//!
//! Authenticates the upgrade request, then runs one write loop and one read
//! loop per connection until either side goes away.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::client::Client;
use super::messages::{msg_types, system, ClientMessage, Message};
use crate::server::state::{GuardedHub, GuardedTokenVerifier};
use crate::server::ServerConfig;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Route handler for `GET /v1/ws?token=...`.
///
/// The token is checked before the protocol handshake, so a bad token gets a
/// plain 401 instead of an upgraded connection.
pub async fn ws_handler(
    Query(query): Query<WsQuery>,
    State(hub): State<GuardedHub>,
    State(verifier): State<GuardedTokenVerifier>,
    State(config): State<ServerConfig>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = query.token.unwrap_or_default();
    let user_id = match verifier.verify(token.trim()) {
        Ok(user_id) => user_id,
        Err(e) => {
            debug!("Rejected WebSocket upgrade: {}", e);
            return e.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    debug!("WebSocket upgrade for user {}", user_id);
    let ping_interval = config.ws_ping_interval;
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, hub, ping_interval))
}

async fn handle_socket(socket: WebSocket, user_id: u64, hub: GuardedHub, ping_interval: Duration) {
    let (client, outgoing_rx) = Client::new(user_id, hub.client_queue_capacity());
    let client_id = client.id();

    if let Err(e) = hub.register(client.clone()).await {
        warn!("Dropping WebSocket for user {}: {}", user_id, e);
        return;
    }
    info!("WebSocket connected: user {} client {}", user_id, client_id);

    let (ws_sink, ws_stream) = socket.split();

    let connected_msg = Message::new(
        msg_types::CONNECTED,
        system::Connected {
            user_id,
            client_id: client_id.to_string(),
            server_version: format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
        },
    );

    let outgoing_handle = tokio::spawn(forward_outgoing(
        ws_sink,
        outgoing_rx,
        connected_msg,
        ping_interval,
    ));

    process_incoming(ws_stream, &client).await;

    info!("WebSocket disconnected: user {} client {}", user_id, client_id);
    outgoing_handle.abort();

    if let Err(e) = hub.unregister(user_id, client_id).await {
        debug!("Hub already stopped while unregistering {}: {}", client_id, e);
    }
}

/// Drain the client's queue into the socket, pinging on `ping_interval`.
async fn forward_outgoing(
    mut ws_sink: SplitSink<WebSocket, WsMessage>,
    mut outgoing_rx: mpsc::Receiver<Message>,
    initial_msg: Message,
    ping_interval: Duration,
) {
    if let Ok(json) = serde_json::to_string(&initial_msg) {
        if ws_sink.send(WsMessage::Text(json.into())).await.is_err() {
            return;
        }
    }

    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = outgoing_rx.recv() => {
                let Some(msg) = msg else { break };
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if ws_sink.send(WsMessage::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to serialize WebSocket message: {}", e);
                    }
                }
            }
            _ = ping.tick() => {
                if ws_sink.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = ws_sink.close().await;
}

async fn process_incoming(mut ws_stream: SplitStream<WebSocket>, client: &Client) {
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(client, msg),
                Err(e) => {
                    debug!("Failed to parse client message: {}", e);
                    reply(
                        client,
                        Message::new(
                            msg_types::ERROR,
                            system::Error::new(
                                "parse_error",
                                format!("Invalid message format: {}", e),
                            ),
                        ),
                    );
                }
            },
            Ok(WsMessage::Binary(_)) => {
                reply(
                    client,
                    Message::new(
                        msg_types::ERROR,
                        system::Error::new("unsupported", "Binary messages are not supported"),
                    ),
                );
            }
            // Protocol-level pings are answered by the WebSocket layer.
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
            Ok(WsMessage::Close(_)) => break,
            Err(e) => {
                debug!("WebSocket read error for client {}: {}", client.id(), e);
                break;
            }
        }
    }
}

fn handle_client_message(client: &Client, msg: ClientMessage) {
    match msg.msg_type.as_str() {
        msg_types::PING => reply(client, Message::empty(msg_types::PONG)),
        msg_types::PONG => {}
        other => {
            debug!("Unknown client message type: {}", other);
            reply(
                client,
                Message::new(
                    msg_types::ERROR,
                    system::Error::new(
                        "unknown_type",
                        format!("Unknown message type: {}", other),
                    ),
                ),
            );
        }
    }
}

/// Replies share the client's queue with broadcasts and are dropped the same way.
fn reply(client: &Client, message: Message) {
    if let Err(e) = client.try_send(message) {
        debug!("Could not reply to client {}: {:?}", client.id(), e);
    }
}
