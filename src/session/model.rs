//! Session record and its lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a meeting session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    BotJoining,
    InProgress,
    Completed,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::BotJoining => "bot_joining",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether `self -> next` is an allowed edge.
    ///
    /// `Failed -> BotJoining` and `BotJoining -> BotJoining` only happen inside the
    /// join retry / reconnect loop. Nothing ever returns to `Created`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, BotJoining)
                | (Created, InProgress)
                | (BotJoining, BotJoining)
                | (BotJoining, InProgress)
                | (BotJoining, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, BotJoining)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One meeting's join-to-delivery record.
///
/// Optional fields default on load so snapshots written by older builds keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Platform-native meeting id; stable for the session lifetime.
    pub meeting_ref: String,
    pub meeting_url: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub state: SessionState,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub join_retries: u32,
}

impl Session {
    pub fn new(meeting_ref: String, meeting_url: String, start_time: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            meeting_ref,
            meeting_url,
            start_time,
            end_time: None,
            state: SessionState::Created,
            bot_id: None,
            transcript: None,
            error: None,
            join_retries: 0,
        }
    }

    /// Store a freshly fetched transcript. Empty text never replaces a stored one.
    pub fn record_transcript(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.transcript = Some(text.to_string());
        true
    }

    pub fn has_transcript(&self) -> bool {
        self.transcript.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = SessionState::Failed;
        self.error = Some(error.into());
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            meeting_ref: self.meeting_ref.clone(),
            meeting_url: self.meeting_url.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            state: self.state,
            has_bot: self.bot_id.is_some(),
            has_transcript: self.has_transcript(),
            error: self.error.clone(),
            join_retries: self.join_retries,
        }
    }
}

/// Read-only view of a session for the CLI and API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub meeting_ref: String,
    pub meeting_url: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub has_bot: bool,
    pub has_transcript: bool,
    pub error: Option<String>,
    pub join_retries: u32,
}

/// Derive the platform-native meeting id from a join URL (its last path segment).
pub fn meeting_ref_from_url(meeting_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(meeting_url.trim()).ok()?;
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}
