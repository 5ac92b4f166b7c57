use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{Orchestrator, TaskKind};
use crate::session::{Session, SessionState};
use crate::verifier::Verification;

/// How long a retiring session's monitor may keep delivering after it finalized.
const RETIRE_GRACE: Duration = Duration::from_secs(300);

impl Orchestrator {
    /// Drive the periodic sweep until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.inner.timings.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "Session sweep running every {}s",
            self.inner.timings.sweep_interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down session sweep");
                    break;
                }
                _ = ticker.tick() => self.sweep().await,
            }
        }
    }

    /// One pass over every session.
    ///
    /// Starts joins for sessions that are due, retires sessions that are past the
    /// staleness bound, and restarts monitoring for sessions that lost their task.
    pub async fn sweep(&self) {
        let timings = &self.inner.timings;
        let tasks = &self.inner.tasks;
        tasks.prune();

        let now = self.now();
        for session in self.inner.registry.list().await {
            let id = session.id.as_str();
            if tasks.is_running(id, TaskKind::Retire) {
                continue;
            }

            let age = now - session.start_time;
            let past_start = age >= chrono::Duration::zero();
            let age = age.to_std().unwrap_or(Duration::ZERO);

            if past_start && age > timings.stale_after {
                self.retire(session);
                continue;
            }

            match session.state {
                SessionState::Created
                    if self.in_join_window(&session, now) && !tasks.is_running(id, TaskKind::Join) =>
                {
                    match self.verify(&session).await {
                        Verification::Active { bot_id } => {
                            info!("Bot already active in meeting {}", session.meeting_ref);
                            self.enter_in_progress(id, bot_id).await;
                        }
                        Verification::Inactive => {
                            info!(
                                "Meeting {} is due, joining (session {})",
                                session.meeting_ref, id
                            );
                            self.spawn_join(id);
                        }
                    }
                }
                SessionState::Failed
                    if self.join_retry_pending(&session, now) && !tasks.has_any(id) =>
                {
                    info!("Retrying join for session {}", id);
                    self.spawn_join(id);
                }
                SessionState::BotJoining if !tasks.has_any(id) => {
                    info!("Resuming admission monitoring for session {}", id);
                    self.spawn_admission_monitor(id, None);
                }
                SessionState::InProgress if !tasks.has_any(id) => {
                    info!("Resuming transcript monitoring for session {}", id);
                    self.spawn_transcript_monitor(id);
                }
                _ => {}
            }
        }
    }

    /// Stop everything running for a stale session and drop it.
    fn retire(&self, session: Session) {
        let tasks = &self.inner.tasks;
        tasks.cancel(&session.id, TaskKind::Join);
        let monitor = tasks.take(&session.id, TaskKind::Monitor);

        info!(
            "Retiring session {} for meeting {} ({})",
            session.id, session.meeting_ref, session.state
        );

        let this = self.clone();
        let key = session.id.clone();
        let id = session.id.clone();
        tasks.spawn(&key, TaskKind::Retire, async move {
            if let Some(mut monitor) = monitor {
                let finalizing = this
                    .inner
                    .registry
                    .get(&id)
                    .await
                    .is_some_and(|s| s.end_time.is_some());
                if finalizing {
                    // Already finalizing; let delivery finish.
                    if timeout(RETIRE_GRACE, &mut monitor).await.is_err() {
                        warn!("Monitor for session {} did not finish, aborting", id);
                        monitor.abort();
                    }
                } else {
                    monitor.abort();
                    let _ = monitor.await;
                }
            }

            this.finalize(&id).await;

            if let Some(current) = this.inner.registry.get(&id).await {
                if current.bot_id.is_some() {
                    this.teardown_bot(&current.meeting_ref).await;
                }
            }
            if this.inner.registry.remove(&id).await.is_some() {
                debug!("Session {} removed", id);
            }
            this.forget_meeting_lock(&session.meeting_ref);
        });
    }
}
