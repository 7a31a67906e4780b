//! Realtime fan-out of messages to connected users.
//!
//! The hub event loop is the only writer of the room map. Registrations,
//! unregistrations and queued broadcasts reach it over channels; readers
//! (synchronous broadcasts, connection counts) take a shared read lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::{Client, DEFAULT_CLIENT_QUEUE_CAPACITY};
use super::messages::Message;
use super::room::Room;
use crate::server::metrics;

pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Buffer for register/unregister requests; callers wait for the loop anyway.
const MEMBERSHIP_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub broadcast_capacity: usize,
    pub client_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Realtime hub is not running")]
pub struct HubClosed;

struct Registration {
    client: Client,
    done: oneshot::Sender<()>,
}

struct Unregistration {
    user_id: u64,
    client_id: Uuid,
    done: oneshot::Sender<()>,
}

type Rooms = Arc<RwLock<HashMap<u64, Room>>>;

pub struct Hub {
    config: HubConfig,
    rooms: Rooms,
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<Unregistration>,
    broadcast_tx: mpsc::Sender<Message>,
}

impl Hub {
    /// Create the hub and spawn its event loop, which runs until `shutdown` fires.
    pub fn spawn(config: HubConfig, shutdown: CancellationToken) -> Arc<Self> {
        let rooms: Rooms = Arc::new(RwLock::new(HashMap::new()));
        let (register_tx, register_rx) = mpsc::channel(MEMBERSHIP_CHANNEL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(MEMBERSHIP_CHANNEL_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity.max(1));

        tokio::spawn(run_event_loop(
            rooms.clone(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            shutdown,
        ));

        Arc::new(Self {
            config,
            rooms,
            register_tx,
            unregister_tx,
            broadcast_tx,
        })
    }

    pub fn client_queue_capacity(&self) -> usize {
        self.config.client_queue_capacity
    }

    /// Add a client to its user's room, creating the room if needed.
    ///
    /// Returns once the event loop has applied the change.
    pub async fn register(&self, client: Client) -> Result<(), HubClosed> {
        let (done, applied) = oneshot::channel();
        self.register_tx
            .send(Registration { client, done })
            .await
            .map_err(|_| HubClosed)?;
        applied.await.map_err(|_| HubClosed)
    }

    /// Remove a client; the room goes away with its last client.
    pub async fn unregister(&self, user_id: u64, client_id: Uuid) -> Result<(), HubClosed> {
        let (done, applied) = oneshot::channel();
        self.unregister_tx
            .send(Unregistration {
                user_id,
                client_id,
                done,
            })
            .await
            .map_err(|_| HubClosed)?;
        applied.await.map_err(|_| HubClosed)
    }

    /// Queue `message` for every connection of `user_id` through the event loop.
    ///
    /// Never blocks: when the broadcast channel is full the message is dropped.
    pub fn publish_to_user(&self, user_id: u64, message: Message) {
        self.enqueue(message.for_user(user_id));
    }

    /// Queue `message` for every connected user through the event loop.
    pub fn publish_to_all(&self, mut message: Message) {
        message.user_id = None;
        self.enqueue(message);
    }

    /// Deliver to every connection of `user_id` from the calling task.
    ///
    /// Returns the number of connections the message was queued for.
    pub fn broadcast_to_user(&self, user_id: u64, message: &Message) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms
            .get(&user_id)
            .map(|room| room.broadcast(message))
            .unwrap_or(0)
    }

    /// Deliver to every connection of every user from the calling task.
    pub fn broadcast_to_all(&self, message: &Message) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.values().map(|room| room.broadcast(message)).sum()
    }

    /// Number of live connections of one user.
    pub fn get_active_connections(&self, user_id: u64) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .map(Room::len)
            .unwrap_or(0)
    }

    pub fn total_connections(&self) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Room::len)
            .sum()
    }

    pub fn room_count(&self) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn connected_users(&self) -> Vec<u64> {
        let mut users: Vec<u64> = self
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        users.sort_unstable();
        users
    }

    fn enqueue(&self, message: Message) {
        match self.broadcast_tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                metrics::record_dropped_message("broadcast_full");
                warn!(
                    "Broadcast channel full, dropping {} for {:?}",
                    message.msg_type, message.user_id
                );
            }
            Err(TrySendError::Closed(message)) => {
                debug!("Hub stopped, dropping {}", message.msg_type);
            }
        }
    }
}

async fn run_event_loop(
    rooms: Rooms,
    mut register_rx: mpsc::Receiver<Registration>,
    mut unregister_rx: mpsc::Receiver<Unregistration>,
    mut broadcast_rx: mpsc::Receiver<Message>,
    shutdown: CancellationToken,
) {
    info!("Realtime hub started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(registration) = register_rx.recv() => {
                let client = registration.client;
                let total = {
                    let mut rooms = rooms.write().unwrap_or_else(PoisonError::into_inner);
                    let user_id = client.user_id();
                    debug!("Registering client {} for user {}", client.id(), user_id);
                    rooms
                        .entry(user_id)
                        .or_insert_with(|| Room::new(user_id))
                        .add(client);
                    rooms.values().map(Room::len).sum()
                };
                metrics::set_ws_connections(total);
                let _ = registration.done.send(());
            }
            Some(unregistration) = unregister_rx.recv() => {
                let total = {
                    let mut rooms = rooms.write().unwrap_or_else(PoisonError::into_inner);
                    let user_id = unregistration.user_id;
                    if let Some(room) = rooms.get_mut(&user_id) {
                        room.remove(unregistration.client_id);
                        if room.is_empty() {
                            debug!("Closing room for user {}", user_id);
                            rooms.remove(&user_id);
                        }
                    }
                    rooms.values().map(Room::len).sum()
                };
                metrics::set_ws_connections(total);
                let _ = unregistration.done.send(());
            }
            Some(message) = broadcast_rx.recv() => {
                let rooms = rooms.read().unwrap_or_else(PoisonError::into_inner);
                match message.user_id {
                    Some(user_id) => {
                        if let Some(room) = rooms.get(&user_id) {
                            room.broadcast(&message);
                        }
                    }
                    None => {
                        for room in rooms.values() {
                            room.broadcast(&message);
                        }
                    }
                }
            }
            else => break,
        }
    }

    rooms
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    metrics::set_ws_connections(0);
    info!("Realtime hub stopped");
}
