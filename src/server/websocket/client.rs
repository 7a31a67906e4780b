//! One live WebSocket connection.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use super::messages::Message;

pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;

/// Error type for send operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The client's outbound queue is full; the message was dropped.
    QueueFull,
    /// The client's write loop is gone.
    Disconnected,
}

/// Handle to a connection's bounded outbound queue.
///
/// Cloning shares the queue; the connection's write loop owns the receiving end.
#[derive(Debug, Clone)]
pub struct Client {
    id: Uuid,
    user_id: u64,
    sender: mpsc::Sender<Message>,
}

impl Client {
    /// Create a client and the receiver its write loop drains.
    pub fn new(user_id: u64, queue_capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                user_id,
                sender,
            },
            receiver,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    /// Queue a message without waiting.
    pub fn try_send(&self, message: Message) -> Result<(), SendError> {
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::Disconnected,
        })
    }
}
