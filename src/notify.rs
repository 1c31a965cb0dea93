//! Notification dispatch
//!
//! Dispatch is fire-and-forget: callers hand over an event and return
//! immediately. Delivery failures are logged and never reach the request.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::complaint::ComplaintStatus;

/// Danger score at or above which staff are alerted on creation
pub const HIGH_DANGER_THRESHOLD: f64 = 8.0;

/// Events the service reports to the outside world
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    StatusChanged {
        complaint_id: String,
        citizen_id: String,
        from: ComplaintStatus,
        to: ComplaintStatus,
    },
    HighDanger {
        complaint_id: String,
        danger_score: f64,
        address: String,
    },
    UpvoteMilestone {
        complaint_id: String,
        citizen_id: String,
        upvotes: usize,
    },
    OtpRequested {
        phone: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::HighDanger { .. } => "high_danger",
            Self::UpvoteMilestone { .. } => "upvote_milestone",
            Self::OtpRequested { .. } => "otp_requested",
        }
    }
}

/// Upvote counts worth telling the owner about
pub fn is_upvote_milestone(count: usize) -> bool {
    matches!(count, 1 | 5 | 10) || (count > 0 && count % 25 == 0)
}

/// Sink for notification events
pub trait NotificationDispatcher: Send + Sync {
    /// Hand over an event. Must not block or fail the caller.
    fn dispatch(&self, notification: Notification);
}

/// Writes events to the log only
#[derive(Debug, Default, Clone)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(&self, notification: Notification) {
        info!(event = notification.kind(), ?notification, "Notification");
    }
}

/// POSTs each event as JSON to a webhook
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

impl NotificationDispatcher for WebhookDispatcher {
    fn dispatch(&self, notification: Notification) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let kind = notification.kind();
            match client.post(&url).json(&notification).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(event = kind, "Notification delivered");
                }
                Ok(resp) => {
                    warn!(event = kind, status = %resp.status(), "Notification webhook rejected event");
                }
                Err(e) => {
                    warn!(event = kind, error = %e, "Notification webhook unreachable");
                }
            }
        });
    }
}
