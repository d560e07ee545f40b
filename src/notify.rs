// src/notify.rs
//! Best-effort real-time push to a user's open sessions.

use crate::error::NotifyError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

pub const PROGRESS_UPDATED: &str = "progress:updated";

/// Must not block; callers treat every error as droppable.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        user_id: Uuid,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError>;
}

#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    pub user_id: Uuid,
    pub event: String,
    pub payload: serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

/// Fans notifications out to every subscriber; each subscription only sees
/// its own user's events. Slow subscribers lose the oldest events.
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self, user_id: Uuid) -> impl Stream<Item = Notification> + Send + use<> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(move |received| match received {
            Ok(notification) if notification.user_id == user_id => Some(notification),
            Ok(_) => None,
            Err(lagged) => {
                tracing::debug!(%user_id, "notification stream lagged: {}", lagged);
                None
            }
        })
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(
        &self,
        user_id: Uuid,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError> {
        let notification = Notification {
            user_id,
            event: event.to_string(),
            payload,
            sent_at: Utc::now(),
        };
        self.sender
            .send(notification)
            .map(|_| ())
            .map_err(|_| NotifyError::NoSubscribers(user_id))
    }
}
