//! Typed event publishing on top of the [`Hub`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::hub::Hub;
use super::messages::{job, msg_types, Message};
use crate::background_jobs::{JobEventEmitter, JobEventSource};

/// Publishes domain and job events. Every method is fire-and-forget.
#[derive(Clone)]
pub struct Broadcaster {
    hub: Arc<Hub>,
}

impl Broadcaster {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Publish an event of type `event_type` to every connection of `user_id`.
    pub fn publish(&self, user_id: u64, event_type: &str, payload: impl Serialize) {
        self.hub
            .publish_to_user(user_id, Message::new(event_type, payload));
    }

    /// Publish an event to every connected user.
    pub fn publish_to_all(&self, event_type: &str, payload: impl Serialize) {
        self.hub.publish_to_all(Message::new(event_type, payload));
    }

    fn publish_job_event(&self, source: &JobEventSource, message: Message) {
        match source.user_id {
            Some(user_id) => self.hub.publish_to_user(user_id, message),
            None => self.hub.publish_to_all(message),
        }
    }
}

impl JobEventEmitter for Broadcaster {
    fn emit_job_started(&self, source: &JobEventSource) {
        self.publish_job_event(
            source,
            Message::new(
                msg_types::JOB_STARTED,
                job::JobStarted {
                    job_name: source.job_name.clone(),
                    execution_id: source.execution_id,
                },
            ),
        );
    }

    fn emit_job_progress(&self, source: &JobEventSource, percent: u8, message: &str) {
        self.publish_job_event(
            source,
            Message::new(
                msg_types::JOB_PROGRESS,
                job::JobProgress {
                    job_name: source.job_name.clone(),
                    execution_id: source.execution_id,
                    percent,
                    message: message.to_string(),
                },
            ),
        );
    }

    fn emit_job_completed(&self, source: &JobEventSource, duration: Duration, attempts: u32) {
        self.publish_job_event(
            source,
            Message::new(
                msg_types::JOB_COMPLETED,
                job::JobCompleted {
                    job_name: source.job_name.clone(),
                    execution_id: source.execution_id,
                    duration_ms: duration.as_millis() as u64,
                    attempts,
                },
            ),
        );
    }

    fn emit_job_failed(&self, source: &JobEventSource, error: &str, attempts: u32) {
        self.publish_job_event(
            source,
            Message::new(
                msg_types::JOB_FAILED,
                job::JobFailed {
                    job_name: source.job_name.clone(),
                    execution_id: source.execution_id,
                    error: error.to_string(),
                    attempts,
                },
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::websocket::client::Client;
    use crate::server::websocket::hub::HubConfig;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    async fn recv(rx: &mut mpsc::Receiver<Message>) -> Message {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_owned_job_events_reach_only_owner() {
        let hub = Hub::spawn(HubConfig::default(), CancellationToken::new());
        let (owner, mut owner_rx) = Client::new(10, 8);
        let (other, mut other_rx) = Client::new(11, 8);
        hub.register(owner).await.unwrap();
        hub.register(other).await.unwrap();

        let broadcaster = Broadcaster::new(hub.clone());
        let source = JobEventSource {
            job_name: "calendar_sync".to_string(),
            execution_id: None,
            user_id: Some(10),
        };
        broadcaster.emit_job_failed(&source, "token expired", 2);

        let msg = recv(&mut owner_rx).await;
        assert_eq!(msg.msg_type, msg_types::JOB_FAILED);
        assert_eq!(
            msg.payload,
            json!({"job_name": "calendar_sync", "error": "token expired", "attempts": 2})
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_system_job_events_reach_everyone() {
        let hub = Hub::spawn(HubConfig::default(), CancellationToken::new());
        let (a, mut a_rx) = Client::new(1, 8);
        let (b, mut b_rx) = Client::new(2, 8);
        hub.register(a).await.unwrap();
        hub.register(b).await.unwrap();

        let broadcaster = Broadcaster::new(hub.clone());
        let source = JobEventSource {
            job_name: "execution_history_cleanup".to_string(),
            execution_id: None,
            user_id: None,
        };
        broadcaster.emit_job_started(&source);

        assert_eq!(recv(&mut a_rx).await.msg_type, msg_types::JOB_STARTED);
        assert_eq!(recv(&mut b_rx).await.msg_type, msg_types::JOB_STARTED);
    }

    #[tokio::test]
    async fn test_publish_domain_event() {
        let hub = Hub::spawn(HubConfig::default(), CancellationToken::new());
        let (client, mut rx) = Client::new(3, 8);
        hub.register(client).await.unwrap();

        Broadcaster::new(hub.clone()).publish(3, msg_types::GOAL_UPDATED, json!({"goal_id": 9}));

        let msg = recv(&mut rx).await;
        assert_eq!(msg.msg_type, "goal.updated");
        assert_eq!(msg.payload, json!({"goal_id": 9}));
    }
}
