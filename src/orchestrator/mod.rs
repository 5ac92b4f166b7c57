//! Session orchestration.
//!
//! The orchestrator owns the session state machine:
//!
//! `Created -> BotJoining -> InProgress -> Completed`, with `Failed` reachable from
//! `BotJoining` and `InProgress`.
//!
//! A trigger creates the session; the periodic sweep (or an explicit request) starts
//! join-with-retry; a created bot is watched by the admission monitor until it is let
//! in; the transcript monitor then polls until the meeting ends and finalizes, which
//! delivers the result. Every background step runs on a task tracked per session and
//! re-reads the session from the registry before acting on it.

mod admission;
pub mod clock;
mod sweep;
pub mod tasks;
mod transcript;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::delivery::Delivery;
use crate::gateway::{BotGateway, BotOptions, BotRequest, CreateOutcome};
use crate::session::{
    meeting_ref_from_url, Session, SessionRegistry, SessionState, SessionSummary,
};
use crate::verifier::{Verification, Verifier};

use admission::AdmissionBudget;

pub use clock::{Clock, SystemClock, TokioClock};
pub use tasks::{TaskKind, TaskSet};

/// Delays, bounds and retry counts used by the state machine.
#[derive(Debug, Clone)]
pub struct Timings {
    pub join_delay: Duration,
    pub join_attempts: u32,
    pub join_retry_delay: Duration,
    pub verify_window: Duration,
    pub verify_poll: Duration,
    pub cleanup_wait: Duration,
    pub admission_timeout: Duration,
    pub admission_poll: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_wait: Duration,
    pub transcript_poll: Duration,
    pub max_meeting: Duration,
    pub sweep_interval: Duration,
    pub join_window: Duration,
    pub stale_after: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl Timings {
    pub fn from_config(config: &Config) -> Self {
        let secs = Duration::from_secs;
        Self {
            join_delay: secs(config.bot.join_delay_secs),
            join_attempts: config.bot.join_attempts.max(1),
            join_retry_delay: secs(config.bot.join_retry_delay_secs),
            verify_window: secs(config.bot.verify_window_secs),
            verify_poll: secs(1),
            cleanup_wait: secs(config.bot.cleanup_wait_secs),
            admission_timeout: secs(config.bot.admission_timeout_secs),
            admission_poll: secs(config.bot.admission_poll_secs),
            reconnect_attempts: config.bot.reconnect_attempts,
            reconnect_wait: secs(config.bot.reconnect_wait_secs),
            transcript_poll: secs(config.bot.transcript_poll_secs),
            max_meeting: secs(config.bot.max_meeting_secs),
            sweep_interval: secs(config.scheduler.sweep_interval_secs),
            join_window: secs(config.scheduler.join_window_secs),
            stale_after: secs(config.scheduler.stale_after_secs),
        }
    }
}

/// How the bot presents itself when it is created.
#[derive(Debug, Clone)]
pub struct BotProfile {
    pub name: String,
    /// Passed to the gateway so it can post its own events.
    pub webhook_url: Option<String>,
    pub options: BotOptions,
}

impl BotProfile {
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: config.bot.name.clone(),
            webhook_url: config.delivery.url.clone(),
            options: BotOptions {
                wait_for_host: config.bot.wait_for_host,
                persistent: config.bot.persistent,
                wait_for_admission: true,
                admission_timeout_secs: config.bot.admission_timeout_secs,
                retry_on_disconnect: config.bot.retry_on_disconnect,
                auto_leave_on_empty: config.bot.auto_leave_on_empty,
            },
        }
    }
}

/// Result of a single join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A verified bot is already in the meeting; the session is in progress.
    AlreadyActive,
    /// The gateway accepted a new bot; admission is being monitored.
    Requested { bot_id: String },
    /// A bot requested earlier for this session is still waiting for admission.
    InFlight { bot_id: String },
    /// The request failed; the session is `Failed` with the error recorded.
    Failed(String),
    /// The session is gone or already finalized.
    Unavailable,
}

impl JoinOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::AlreadyActive | Self::Requested { .. } | Self::InFlight { .. }
        )
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: SessionRegistry,
    gateway: Arc<dyn BotGateway>,
    verifier: Verifier,
    delivery: Delivery,
    profile: BotProfile,
    timings: Timings,
    clock: Arc<dyn Clock>,
    tasks: TaskSet,
    meeting_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        registry: SessionRegistry,
        gateway: Arc<dyn BotGateway>,
        delivery: Delivery,
        profile: BotProfile,
        timings: Timings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                verifier: Verifier::new(gateway.clone()),
                gateway,
                delivery,
                profile,
                timings,
                clock,
                tasks: TaskSet::new(),
                meeting_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn timings(&self) -> &Timings {
        &self.inner.timings
    }

    pub fn tasks(&self) -> &TaskSet {
        &self.inner.tasks
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Register a meeting to be joined at `start_time`.
    ///
    /// A meeting that already has a live session is not registered twice; the
    /// existing session id is returned instead.
    pub async fn trigger(&self, meeting_url: &str, start_time: DateTime<Utc>) -> Result<String> {
        let Some(meeting_ref) = meeting_ref_from_url(meeting_url) else {
            bail!("Cannot derive a meeting id from URL: {}", meeting_url);
        };

        let session = Session::new(meeting_ref.clone(), meeting_url.trim().to_string(), start_time);
        let now = self.now();
        let (id, created) = self
            .inner
            .registry
            .insert_unique(session, |existing| self.owns_meeting(existing, now))
            .await;

        if created {
            info!(
                "Session {} created for meeting {} starting at {}",
                id, meeting_ref, start_time
            );
        } else {
            info!(
                "Meeting {} already tracked by session {}, not creating another",
                meeting_ref, id
            );
        }
        Ok(id)
    }

    pub async fn status(&self, id: &str) -> Option<SessionSummary> {
        self.inner.registry.get(id).await.map(|s| s.summary())
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        self.inner
            .registry
            .list()
            .await
            .iter()
            .map(Session::summary)
            .collect()
    }

    /// Launch join-with-retry for the session now. Returns `false` when the
    /// session is unknown, already finalized, or a join is already running for it.
    pub async fn join_now(&self, id: &str) -> bool {
        let Some(session) = self.inner.registry.get(id).await else {
            return false;
        };
        if session.end_time.is_some() {
            debug!("Session {} already finalized, not joining", id);
            return false;
        }
        if self.inner.tasks.is_running(id, TaskKind::Join) {
            debug!("Join already running for session {}", id);
            return false;
        }
        self.spawn_join(id);
        true
    }

    /// Whether `now` falls inside the window in which a due session is joined.
    fn in_join_window(&self, session: &Session, now: DateTime<Utc>) -> bool {
        let age = now - session.start_time;
        age >= chrono::Duration::zero()
            && age.to_std().unwrap_or(Duration::ZERO) < self.inner.timings.join_window
    }

    /// A failed join that the sweep will still retry.
    fn join_retry_pending(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.state == SessionState::Failed
            && session.end_time.is_none()
            && self.in_join_window(session, now)
    }

    /// Whether `session` is still the one driving its meeting. A new trigger for
    /// the same meeting reuses it instead of starting a competing session.
    fn owns_meeting(&self, session: &Session, now: DateTime<Utc>) -> bool {
        !session.state.is_terminal() || self.join_retry_pending(session, now)
    }

    fn spawn_join(&self, id: &str) {
        let this = self.clone();
        let session_id = id.to_string();
        self.inner.tasks.spawn(id, TaskKind::Join, async move {
            this.join_with_retry(&session_id).await;
        });
    }

    fn meeting_lock(&self, meeting_ref: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .meeting_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(meeting_ref.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn forget_meeting_lock(&self, meeting_ref: &str) {
        let mut locks = self
            .inner
            .meeting_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.remove(meeting_ref);
    }

    async fn verify(&self, session: &Session) -> Verification {
        self.inner
            .verifier
            .verify(&session.meeting_ref, session.bot_id.as_deref())
            .await
    }

    /// Best-effort removal of the meeting's bot.
    async fn teardown_bot(&self, meeting_ref: &str) {
        if let Err(e) = self.inner.gateway.delete(meeting_ref).await {
            warn!("Failed to remove bot from meeting {}: {}", meeting_ref, e);
        }
    }

    async fn clear_bot(&self, id: &str) {
        self.inner
            .registry
            .update(id, |s| {
                s.bot_id = None;
            })
            .await;
    }

    async fn fail(&self, id: &str, error: String) {
        error!("Session {} failed: {}", id, error);
        self.inner.registry.update(id, |s| s.fail(error)).await;
    }

    /// Move the session to `InProgress` and start transcript monitoring.
    ///
    /// Safe to call from several places at once: only the caller that actually
    /// moves the state starts a monitor.
    async fn enter_in_progress(&self, id: &str, bot_id: Option<String>) -> bool {
        let Some(current) = self.inner.registry.get(id).await else {
            return false;
        };
        if current.end_time.is_some() {
            return false;
        }
        // Failed only leads back through BotJoining.
        if current.state == SessionState::Failed {
            self.inner
                .registry
                .transition(id, SessionState::BotJoining)
                .await;
        }

        let moved = self
            .inner
            .registry
            .update(id, |s| {
                if s.state == SessionState::InProgress || s.end_time.is_some() {
                    return false;
                }
                s.state = SessionState::InProgress;
                s.error = None;
                if bot_id.is_some() {
                    s.bot_id = bot_id;
                }
                true
            })
            .await
            .unwrap_or(false);

        if moved {
            info!("Bot admitted, session {} in progress", id);
            self.spawn_transcript_monitor(id);
        }
        moved
    }

    /// Request a bot for the session.
    ///
    /// Joins for one meeting are serialized. An already verified bot short-circuits
    /// to `InProgress`; a stale bot reference is torn down first. On success the
    /// admission monitor takes over in the background and this returns immediately.
    /// A finalized session is never joined again.
    pub async fn join_meeting(&self, id: &str) -> JoinOutcome {
        self.request_bot(id, None).await
    }

    /// `join_meeting`, carrying over the admission budget of a monitor that is
    /// reconnecting its bot.
    async fn request_bot(&self, id: &str, budget: Option<AdmissionBudget>) -> JoinOutcome {
        let Some(session) = self.inner.registry.get(id).await else {
            return JoinOutcome::Unavailable;
        };
        let lock = self.meeting_lock(&session.meeting_ref);
        let _guard = lock.lock().await;

        // Re-read: another join may have run while we waited.
        let Some(session) = self.inner.registry.get(id).await else {
            return JoinOutcome::Unavailable;
        };
        if session.end_time.is_some() {
            debug!("Session {} already finalized, not joining", id);
            return JoinOutcome::Unavailable;
        }
        match session.state {
            SessionState::InProgress => return JoinOutcome::AlreadyActive,
            SessionState::Completed => return JoinOutcome::Unavailable,
            SessionState::BotJoining => {
                if let Some(bot_id) = &session.bot_id {
                    if self.inner.tasks.is_running(id, TaskKind::Monitor) {
                        debug!("Session {} already waiting on bot {}", id, bot_id);
                        return JoinOutcome::InFlight {
                            bot_id: bot_id.clone(),
                        };
                    }
                }
            }
            SessionState::Created | SessionState::Failed => {}
        }

        if !self
            .inner
            .registry
            .transition(id, SessionState::BotJoining)
            .await
        {
            return JoinOutcome::Unavailable;
        }

        if let Verification::Active { bot_id } = self.verify(&session).await {
            info!("Bot already active in meeting {}", session.meeting_ref);
            self.enter_in_progress(id, bot_id).await;
            return JoinOutcome::AlreadyActive;
        }

        if let Some(stale) = &session.bot_id {
            info!("Cleaning up inactive bot {} for session {}", stale, id);
            self.teardown_bot(&session.meeting_ref).await;
            self.clear_bot(id).await;
            sleep(self.inner.timings.cleanup_wait).await;
        }

        sleep(self.inner.timings.join_delay).await;

        let counted = self
            .inner
            .registry
            .update(id, |s| s.join_retries += 1)
            .await;
        if counted.is_none() {
            debug!("Session {} disappeared before the bot was requested", id);
            return JoinOutcome::Unavailable;
        }

        let request = BotRequest {
            meeting_ref: session.meeting_ref.clone(),
            meeting_url: session.meeting_url.clone(),
            webhook_url: self.inner.profile.webhook_url.clone(),
            name: self.inner.profile.name.clone(),
            options: self.inner.profile.options.clone(),
        };

        match self.inner.gateway.create(&request).await {
            Ok(CreateOutcome::Created { bot_id }) => {
                self.inner
                    .registry
                    .update(id, |s| {
                        s.bot_id = Some(bot_id.clone());
                        s.error = None;
                    })
                    .await;
                info!(
                    "Bot {} created for meeting {}, waiting for admission",
                    bot_id, session.meeting_ref
                );
                self.spawn_admission_monitor(id, budget);
                JoinOutcome::Requested { bot_id }
            }
            Ok(CreateOutcome::Conflict) => {
                warn!(
                    "Bot already exists for meeting {}, verifying",
                    session.meeting_ref
                );
                let Some(current) = self.inner.registry.get(id).await else {
                    return JoinOutcome::Unavailable;
                };
                if let Verification::Active { bot_id } = self.verify(&current).await {
                    self.enter_in_progress(id, bot_id).await;
                    return JoinOutcome::AlreadyActive;
                }
                let reason = "bot exists for meeting but is not active".to_string();
                self.fail(id, reason.clone()).await;
                JoinOutcome::Failed(reason)
            }
            Err(e) => {
                let reason = format!("bot request failed: {e}");
                self.fail(id, reason.clone()).await;
                JoinOutcome::Failed(reason)
            }
        }
    }

    /// Join with up to `join_attempts` tries, each confirmed by verification.
    ///
    /// Returns whether a bot was confirmed in the meeting. Running out of attempts
    /// ends this trigger only; the sweep may start another round later.
    pub async fn join_with_retry(&self, id: &str) -> bool {
        let attempts = self.inner.timings.join_attempts;

        for attempt in 1..=attempts {
            let Some(session) = self.inner.registry.get(id).await else {
                return false;
            };
            if session.end_time.is_some() {
                debug!("Session {} already finalized, not joining", id);
                return false;
            }
            match session.state {
                SessionState::InProgress => return true,
                SessionState::Completed => return false,
                _ => {}
            }

            if let Verification::Active { bot_id } = self.verify(&session).await {
                info!("Bot already active in meeting {}", session.meeting_ref);
                self.enter_in_progress(id, bot_id).await;
                return true;
            }

            if session.bot_id.is_some() {
                self.teardown_bot(&session.meeting_ref).await;
                self.clear_bot(id).await;
            }

            match self.join_meeting(id).await {
                JoinOutcome::AlreadyActive => return true,
                JoinOutcome::Requested { .. } | JoinOutcome::InFlight { .. } => {
                    if self.confirm_admission(id).await {
                        info!("Bot confirmed in meeting {}", session.meeting_ref);
                        return true;
                    }
                    warn!(
                        "Bot requested but not verified active for meeting {} (attempt {}/{})",
                        session.meeting_ref, attempt, attempts
                    );
                }
                JoinOutcome::Failed(reason) => {
                    warn!(
                        "Join attempt {}/{} failed for meeting {}: {}",
                        attempt, attempts, session.meeting_ref, reason
                    );
                }
                JoinOutcome::Unavailable => return false,
            }

            if attempt < attempts {
                sleep(self.inner.timings.join_retry_delay).await;
            }
        }

        error!(
            "Failed to join meeting for session {} after {} attempts",
            id, attempts
        );
        false
    }

    /// Poll verification for up to `verify_window` after a successful request.
    async fn confirm_admission(&self, id: &str) -> bool {
        let timings = &self.inner.timings;
        let checks = (timings.verify_window.as_millis() / timings.verify_poll.as_millis().max(1))
            .max(1);

        for _ in 0..checks {
            sleep(timings.verify_poll).await;
            let Some(session) = self.inner.registry.get(id).await else {
                return false;
            };
            if session.state == SessionState::InProgress {
                return true;
            }
            if let Verification::Active { bot_id } = self.verify(&session).await {
                self.enter_in_progress(id, bot_id).await;
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timings_from_default_config() {
        let timings = Timings::default();
        assert_eq!(timings.join_delay, Duration::from_secs(10));
        assert_eq!(timings.join_attempts, 5);
        assert_eq!(timings.admission_timeout, Duration::from_secs(600));
        assert_eq!(timings.admission_poll, Duration::from_secs(5));
        assert_eq!(timings.reconnect_attempts, 5);
        assert_eq!(timings.max_meeting, Duration::from_secs(7200));
        assert_eq!(timings.sweep_interval, Duration::from_secs(5));
        assert_eq!(timings.join_window, Duration::from_secs(600));
        assert_eq!(timings.stale_after, Duration::from_secs(7200));
    }

    #[test]
    fn test_profile_from_config() {
        let mut config = Config::default();
        config.delivery.url = Some("http://sink.local/hook".to_string());
        let profile = BotProfile::from_config(&config);

        assert_eq!(profile.name, "Athena");
        assert_eq!(profile.webhook_url.as_deref(), Some("http://sink.local/hook"));
        assert!(profile.options.persistent);
        assert!(profile.options.wait_for_admission);
        assert!(!profile.options.wait_for_host);
    }

    #[test]
    fn test_join_outcome_success() {
        assert!(JoinOutcome::AlreadyActive.is_success());
        assert!(JoinOutcome::Requested {
            bot_id: "b1".into()
        }
        .is_success());
        assert!(!JoinOutcome::Failed("x".into()).is_success());
        assert!(!JoinOutcome::Unavailable.is_success());
    }
}
