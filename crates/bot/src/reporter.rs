//! Operator-visible status reporting.
//!
//! Every report is emitted as a structured JSON line through `tracing` and,
//! best-effort, posted to the debug channel. A failed post is logged and
//! otherwise ignored; reporting never fails the caller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pillar_channel_adapter::{DirectoryClient, OutboundPost};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Failure,
}

/// A structured status entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub ts: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    /// Post the report is threaded under, if any.
    pub thread: Option<String>,
    /// Whether the entry reached the debug channel.
    pub delivered: bool,
}

pub struct StatusReporter {
    client: Arc<dyn DirectoryClient>,
    channel_id: Option<String>,
    count: RwLock<u64>,
    failures: RwLock<u64>,
}

impl StatusReporter {
    /// Reporter posting to `channel_id`; with `None` it only logs.
    pub fn new(client: Arc<dyn DirectoryClient>, channel_id: Option<String>) -> Self {
        Self {
            client,
            channel_id,
            count: RwLock::new(0),
            failures: RwLock::new(0),
        }
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub async fn info(&self, message: &str, thread: Option<&str>) -> StatusEntry {
        self.report(Severity::Info, message, thread).await
    }

    pub async fn failure(&self, message: &str, thread: Option<&str>) -> StatusEntry {
        self.report(Severity::Failure, message, thread).await
    }

    /// Emit one entry.
    pub async fn report(
        &self,
        severity: Severity,
        message: &str,
        thread: Option<&str>,
    ) -> StatusEntry {
        let delivered = match self.channel_id {
            Some(ref channel_id) => {
                let mut post = OutboundPost::new(channel_id.as_str(), message);
                if let Some(root) = thread {
                    post = post.in_thread(root);
                }
                match self.client.create_post(&post).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(
                            channel = %channel_id,
                            "Failed to send a message to the debug channel: {}",
                            e
                        );
                        false
                    }
                }
            }
            None => false,
        };

        let entry = StatusEntry {
            ts: Utc::now(),
            severity,
            message: message.to_string(),
            thread: thread.map(str::to_string),
            delivered,
        };

        let json = serde_json::to_string(&entry).unwrap_or_else(|e| {
            format!(
                r#"{{"error":"serialization failed: {}","ts":"{}"}}"#,
                e,
                Utc::now().to_rfc3339()
            )
        });
        match severity {
            Severity::Info => tracing::info!(target: "pillar_status", "{}", json),
            Severity::Failure => tracing::warn!(target: "pillar_status", "{}", json),
        }

        *self.count.write().await += 1;
        if severity == Severity::Failure {
            *self.failures.write().await += 1;
        }
        entry
    }

    /// Total number of entries reported.
    pub async fn report_count(&self) -> u64 {
        *self.count.read().await
    }

    pub async fn failure_count(&self) -> u64 {
        *self.failures.read().await
    }
}
