//! Remote bot-control gateway.
//!
//! The gateway creates, removes and reports on the automated meeting participant.
//! Everything the orchestrator needs from it sits behind [`BotGateway`] so the
//! state machine can be driven against a fake in tests.

pub mod client;
pub mod transcript;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use client::GatewayClient;
pub use transcript::assemble_segments;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway request timed out: {0}")]
    Timeout(String),
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode gateway response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Transport failures, timeouts and server errors are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Normalized bot status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotPhase {
    Active,
    WaitingForAdmission,
    Disconnected,
    Unknown,
}

impl BotPhase {
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" | "in_meeting" | "connected" | "admitted" => Self::Active,
            "waiting_for_admission" | "pending" | "waiting" | "requested" | "joining"
            | "awaiting_admission" => Self::WaitingForAdmission,
            "failed" | "error" | "disconnected" | "left" | "stopped" | "completed" => {
                Self::Disconnected
            }
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::WaitingForAdmission => "waiting_for_admission",
            Self::Disconnected => "disconnected",
            Self::Unknown => "unknown",
        }
    }
}

/// One bot as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotStatus {
    pub bot_id: Option<String>,
    pub meeting_ref: Option<String>,
    pub phase: BotPhase,
    pub raw_status: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl BotStatus {
    /// Parse a bot record, accepting the field spellings the gateway has used.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        let bot_id = ["id", "bot_id"]
            .iter()
            .find_map(|key| object.get(*key).and_then(value_as_string));
        let meeting_ref = ["native_meeting_id", "meeting_id"]
            .iter()
            .find_map(|key| object.get(*key).and_then(value_as_string));
        let raw_status = object
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let created_at = object
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp);

        Some(Self {
            bot_id,
            meeting_ref,
            phase: BotPhase::from_raw(&raw_status),
            raw_status,
            created_at,
        })
    }

    pub fn is_for_meeting(&self, meeting_ref: &str) -> bool {
        self.meeting_ref.as_deref() == Some(meeting_ref)
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Naive timestamps from the gateway are UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Flags sent with a bot creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotOptions {
    pub wait_for_host: bool,
    pub persistent: bool,
    pub wait_for_admission: bool,
    pub admission_timeout_secs: u64,
    pub retry_on_disconnect: bool,
    pub auto_leave_on_empty: bool,
}

impl Default for BotOptions {
    fn default() -> Self {
        Self {
            wait_for_host: false,
            persistent: true,
            wait_for_admission: true,
            admission_timeout_secs: 600,
            retry_on_disconnect: true,
            auto_leave_on_empty: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotRequest {
    pub meeting_ref: String,
    pub meeting_url: String,
    /// Where the gateway should post its own events.
    pub webhook_url: Option<String>,
    pub name: String,
    pub options: BotOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { bot_id: String },
    /// A bot already exists for the meeting; resolve through verification.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotLookup<'a> {
    ByMeeting(&'a str),
    ById(&'a str),
}

/// Latest transcript text for a meeting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptSnapshot {
    pub text: String,
    /// The gateway reports the meeting as over.
    pub meeting_ended: bool,
}

#[async_trait]
pub trait BotGateway: Send + Sync {
    async fn create(&self, request: &BotRequest) -> Result<CreateOutcome, GatewayError>;

    /// Remove the meeting's bot. A bot that is already gone counts as success.
    async fn delete(&self, meeting_ref: &str) -> Result<(), GatewayError>;

    /// `Ok(None)` when the gateway has no such bot.
    async fn status(&self, lookup: BotLookup<'_>) -> Result<Option<BotStatus>, GatewayError>;

    async fn list(&self) -> Result<Vec<BotStatus>, GatewayError>;

    async fn transcript(&self, meeting_ref: &str) -> Result<TranscriptSnapshot, GatewayError>;
}
