//! Final result delivery.
//!
//! Once a session is finalized its result is posted to the configured sink. Failed
//! attempts back off exponentially (1s, 2s, 4s, ...). Running out of attempts is
//! logged; the session's own state is never touched by the outcome.

pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::session::{Session, SessionState};

pub use webhook::WebhookSink;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery transport error: {0}")]
    Transport(String),
    #[error("sink responded with status {0}")]
    Status(u16),
}

/// Body posted to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryPayload {
    pub session_id: String,
    pub meeting_id: String,
    pub meeting_url: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub transcript: Option<String>,
    pub bot_name: String,
    pub status: SessionState,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryPayload {
    pub fn from_session(session: &Session, bot_name: &str) -> Self {
        Self {
            session_id: session.id.clone(),
            meeting_id: session.meeting_ref.clone(),
            meeting_url: session.meeting_url.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
            transcript: session.transcript.clone(),
            bot_name: bot_name.to_string(),
            status: session.state,
            timestamp: Utc::now(),
        }
    }
}

/// Somewhere a finished meeting's result can be sent.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn post(&self, payload: &DeliveryPayload) -> Result<(), DeliveryError>;
}

#[derive(Clone)]
pub struct Delivery {
    sink: Arc<dyn ResultSink>,
    attempts: u32,
}

impl Delivery {
    pub fn new(sink: Arc<dyn ResultSink>, attempts: u32) -> Self {
        Self {
            sink,
            attempts: attempts.max(1),
        }
    }

    /// Post `payload`, retrying with backoff. Returns whether any attempt succeeded.
    pub async fn deliver(&self, payload: &DeliveryPayload) -> bool {
        for attempt in 0..self.attempts {
            match self.sink.post(payload).await {
                Ok(()) => {
                    info!(
                        "Result delivered for meeting {} (session {})",
                        payload.meeting_id, payload.session_id
                    );
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Delivery attempt {}/{} failed for meeting {}: {}",
                        attempt + 1,
                        self.attempts,
                        payload.meeting_id,
                        e
                    );
                    if attempt + 1 < self.attempts {
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                }
            }
        }

        error!(
            "All {} delivery attempts failed for meeting {} (session {})",
            self.attempts, payload.meeting_id, payload.session_id
        );
        false
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}
