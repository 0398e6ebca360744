//! Outbound notification sink.
//!
//! The core treats delivery as fire-and-forget: a failed send is logged and
//! never propagated back into the decision path.

pub mod messages;

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::{error, info};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str);
}

/// Writes notifications to the log. Default sink when no webhook is set.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, chat_id: i64, text: &str) {
        info!(chat_id, %text, "notification");
    }
}

/// Posts notifications as JSON to a webhook endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, chat_id: i64, text: &str) {
        let payload = serde_json::json!({ "chat_id": chat_id, "text": text });
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                error!(chat_id, status = %response.status(), "notification rejected");
            }
            Err(err) => {
                error!(chat_id, error = %err, "notification send failed");
            }
        }
    }
}

/// Captures notifications in memory; test support.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, chat_id: i64, text: &str) {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((chat_id, text.to_string()));
    }
}
