//! In-memory gateway and sink used by the orchestrator tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use meetbot::delivery::{Delivery, DeliveryError, DeliveryPayload, ResultSink};
use meetbot::gateway::{
    BotGateway, BotLookup, BotOptions, BotPhase, BotRequest, BotStatus, CreateOutcome,
    GatewayError, TranscriptSnapshot,
};
use meetbot::orchestrator::{BotProfile, Orchestrator, Timings, TokioClock};
use meetbot::session::{SessionRegistry, SessionState, SessionStore, SessionSummary};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const MEETING_URL: &str = "https://meet.google.com/abc-defg-hij";
pub const MEETING_REF: &str = "abc-defg-hij";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

/// How a created bot behaves: it waits for admission for `after`, then reports `status`.
#[derive(Debug, Clone)]
pub struct BotScript {
    pub status: &'static str,
    pub after: Duration,
}

impl BotScript {
    pub fn admitted_after(secs: u64) -> Self {
        Self {
            status: "active",
            after: Duration::from_secs(secs),
        }
    }

    pub fn drops_after(secs: u64) -> Self {
        Self {
            status: "disconnected",
            after: Duration::from_secs(secs),
        }
    }

    pub fn never_admitted() -> Self {
        Self {
            status: "waiting_for_admission",
            after: Duration::ZERO,
        }
    }
}

struct FakeBot {
    id: String,
    meeting_ref: String,
    created: Instant,
    script: BotScript,
}

impl FakeBot {
    fn status(&self) -> BotStatus {
        let raw = if self.created.elapsed() >= self.script.after {
            self.script.status
        } else {
            "waiting_for_admission"
        };
        BotStatus {
            bot_id: Some(self.id.clone()),
            meeting_ref: Some(self.meeting_ref.clone()),
            phase: BotPhase::from_raw(raw),
            raw_status: raw.to_string(),
            created_at: None,
        }
    }
}

#[derive(Default)]
struct FakeState {
    bot: Option<FakeBot>,
    create_script: VecDeque<Result<CreateOutcome, GatewayError>>,
    bot_scripts: VecDeque<BotScript>,
    default_script: Option<BotScript>,
    transcripts: VecDeque<Result<TranscriptSnapshot, GatewayError>>,
    creates: usize,
    deletes: Vec<String>,
    transcript_calls: usize,
}

#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Behaviour for every bot created after the queued scripts run out.
    pub fn with_default_script(self: Arc<Self>, script: BotScript) -> Arc<Self> {
        self.state.lock().unwrap().default_script = Some(script);
        self
    }

    pub fn queue_bot(&self, script: BotScript) {
        self.state.lock().unwrap().bot_scripts.push_back(script);
    }

    pub fn queue_create(&self, outcome: Result<CreateOutcome, GatewayError>) {
        self.state.lock().unwrap().create_script.push_back(outcome);
    }

    /// Transcript answers in order; the last one keeps being returned.
    pub fn queue_transcripts(&self, snapshots: Vec<Result<TranscriptSnapshot, GatewayError>>) {
        self.state.lock().unwrap().transcripts.extend(snapshots);
    }

    /// A bot that is already live in the meeting.
    pub fn place_active_bot(&self, id: &str, meeting_ref: &str) {
        self.state.lock().unwrap().bot = Some(FakeBot {
            id: id.to_string(),
            meeting_ref: meeting_ref.to_string(),
            created: Instant::now(),
            script: BotScript::admitted_after(0),
        });
    }

    pub fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    pub fn deletes(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn transcript_calls(&self) -> usize {
        self.state.lock().unwrap().transcript_calls
    }
}

pub fn text(text: &str) -> Result<TranscriptSnapshot, GatewayError> {
    Ok(TranscriptSnapshot {
        text: text.to_string(),
        meeting_ended: false,
    })
}

pub fn ended(text: &str) -> Result<TranscriptSnapshot, GatewayError> {
    Ok(TranscriptSnapshot {
        text: text.to_string(),
        meeting_ended: true,
    })
}

#[async_trait]
impl BotGateway for FakeGateway {
    async fn create(&self, request: &BotRequest) -> Result<CreateOutcome, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.creates += 1;
        let n = state.creates;

        let outcome = state.create_script.pop_front().unwrap_or_else(|| {
            Ok(CreateOutcome::Created {
                bot_id: format!("b{n}"),
            })
        });

        if let Ok(CreateOutcome::Created { bot_id }) = &outcome {
            let script = state
                .bot_scripts
                .pop_front()
                .or_else(|| state.default_script.clone())
                .unwrap_or_else(BotScript::never_admitted);
            state.bot = Some(FakeBot {
                id: bot_id.clone(),
                meeting_ref: request.meeting_ref.clone(),
                created: Instant::now(),
                script,
            });
        }
        outcome
    }

    async fn delete(&self, meeting_ref: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.deletes.push(meeting_ref.to_string());
        if state
            .bot
            .as_ref()
            .is_some_and(|bot| bot.meeting_ref == meeting_ref)
        {
            state.bot = None;
        }
        Ok(())
    }

    async fn status(&self, lookup: BotLookup<'_>) -> Result<Option<BotStatus>, GatewayError> {
        let state = self.state.lock().unwrap();
        let found = state.bot.as_ref().filter(|bot| match lookup {
            BotLookup::ByMeeting(meeting_ref) => bot.meeting_ref == meeting_ref,
            BotLookup::ById(id) => bot.id == id,
        });
        Ok(found.map(FakeBot::status))
    }

    async fn list(&self) -> Result<Vec<BotStatus>, GatewayError> {
        let state = self.state.lock().unwrap();
        Ok(state.bot.iter().map(FakeBot::status).collect())
    }

    async fn transcript(&self, _: &str) -> Result<TranscriptSnapshot, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.transcript_calls += 1;
        if state.transcripts.len() > 1 {
            return state.transcripts.pop_front().unwrap();
        }
        state
            .transcripts
            .front()
            .cloned()
            .unwrap_or_else(|| Ok(TranscriptSnapshot::default()))
    }
}

/// Records every payload; answers 500 when `failing`.
#[derive(Default)]
pub struct RecordingSink {
    failing: bool,
    posts: Mutex<Vec<DeliveryPayload>>,
}

impl RecordingSink {
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: true,
            ..Self::default()
        })
    }

    pub fn posts(&self) -> Vec<DeliveryPayload> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn post(&self, payload: &DeliveryPayload) -> Result<(), DeliveryError> {
        self.posts.lock().unwrap().push(payload.clone());
        if self.failing {
            Err(DeliveryError::Status(500))
        } else {
            Ok(())
        }
    }
}

pub fn timings() -> Timings {
    Timings {
        join_delay: Duration::ZERO,
        ..Timings::default()
    }
}

pub fn profile() -> BotProfile {
    BotProfile {
        name: "Athena".to_string(),
        webhook_url: None,
        options: BotOptions::default(),
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub gateway: Arc<FakeGateway>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    pub fn new(gateway: Arc<FakeGateway>, sink: Arc<RecordingSink>) -> Self {
        Self::with(
            SessionRegistry::new(SessionStore::in_memory()),
            gateway,
            sink,
            timings(),
        )
    }

    pub fn with(
        registry: SessionRegistry,
        gateway: Arc<FakeGateway>,
        sink: Arc<RecordingSink>,
        timings: Timings,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            registry,
            gateway.clone(),
            Delivery::new(sink.clone(), 3),
            profile(),
            timings,
            Arc::new(TokioClock::starting_at(t0())),
        );
        Self {
            orchestrator,
            gateway,
            sink,
        }
    }

    pub async fn summary(&self, id: &str) -> Option<SessionSummary> {
        self.orchestrator.status(id).await
    }

    pub async fn state(&self, id: &str) -> Option<SessionState> {
        self.summary(id).await.map(|s| s.state)
    }

    /// Poll once a second until the session satisfies `done` or `limit` passes.
    pub async fn wait_for<F>(&self, id: &str, limit: Duration, done: F) -> Option<SessionSummary>
    where
        F: Fn(Option<&SessionSummary>) -> bool,
    {
        let deadline = Instant::now() + limit;
        loop {
            let summary = self.summary(id).await;
            if done(summary.as_ref()) {
                return summary;
            }
            if Instant::now() >= deadline {
                panic!("session {id} did not reach the expected state, last seen {summary:?}");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Wait until the session is finalized and nothing runs for it any more.
    pub async fn wait_settled(&self, id: &str, limit: Duration) -> SessionSummary {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(summary) = self.summary(id).await {
                if summary.end_time.is_some() && !self.orchestrator.tasks().has_any(id) {
                    return summary;
                }
            }
            if Instant::now() >= deadline {
                panic!("session {id} did not settle");
            }
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    }
}
