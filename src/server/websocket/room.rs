//! All live connections of one user.

use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use super::client::{Client, SendError};
use super::messages::Message;
use crate::server::metrics;

pub struct Room {
    user_id: u64,
    clients: HashMap<Uuid, Client>,
}

impl Room {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            clients: HashMap::new(),
        }
    }

    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id(), client);
    }

    /// Returns true if the client was present.
    pub fn remove(&mut self, client_id: Uuid) -> bool {
        self.clients.remove(&client_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Offer `message` to every client without waiting on any of them.
    ///
    /// A client whose queue is full misses this message; the others still get it.
    /// Returns the number of clients the message was queued for.
    pub fn broadcast(&self, message: &Message) -> usize {
        let mut delivered = 0;
        for client in self.clients.values() {
            match client.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(SendError::QueueFull) => {
                    metrics::record_dropped_message("client_full");
                    warn!(
                        "Dropping {} for user {} client {}: queue full",
                        message.msg_type,
                        self.user_id,
                        client.id()
                    );
                }
                // The client is about to be unregistered.
                Err(SendError::Disconnected) => {}
            }
        }
        delivered
    }
}
