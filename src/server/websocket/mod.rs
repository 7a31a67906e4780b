//! Realtime delivery over WebSocket.
//!
//! A [`Hub`] keeps one [`room::Room`] per connected user; each connection is a
//! [`Client`] with its own bounded outbound queue. Domain code publishes
//! through the [`Broadcaster`].

mod broadcaster;
mod client;
pub mod handler;
mod hub;
pub mod messages;
mod room;

pub use broadcaster::Broadcaster;
pub use client::{Client, SendError, DEFAULT_CLIENT_QUEUE_CAPACITY};
pub use hub::{Hub, HubClosed, HubConfig, DEFAULT_BROADCAST_CAPACITY};
pub use messages::{msg_types, ClientMessage, Message};
