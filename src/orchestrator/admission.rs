use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::{JoinOutcome, Orchestrator, TaskKind};
use crate::gateway::{BotLookup, BotPhase};
use crate::session::SessionState;
use crate::verifier::Verification;

/// What one admission check decided.
enum Check {
    Admitted,
    Waiting,
    Reconnect,
    Done,
}

/// Time and reconnects left for getting one session's bot admitted.
///
/// Carried across reconnects so replacement bots share the original deadline.
#[derive(Debug, Clone, Copy)]
pub(super) struct AdmissionBudget {
    deadline: Instant,
    reconnects: u32,
}

impl Orchestrator {
    /// Start watching the session's bot. `None` opens a fresh budget.
    pub(super) fn spawn_admission_monitor(&self, id: &str, budget: Option<AdmissionBudget>) {
        let budget = budget.unwrap_or_else(|| AdmissionBudget {
            deadline: Instant::now() + self.inner.timings.admission_timeout,
            reconnects: 0,
        });
        let this = self.clone();
        let session_id = id.to_string();
        self.inner.tasks.spawn(id, TaskKind::Monitor, async move {
            this.monitor_admission(&session_id, budget).await;
        });
    }

    /// Watch a requested bot until it is admitted, reconnecting it when it drops.
    ///
    /// Bounded by the budget's deadline, reconnects included; running out of time
    /// leaves the session `Failed`.
    async fn monitor_admission(&self, id: &str, budget: AdmissionBudget) {
        if timeout_at(budget.deadline, self.await_admission(id, budget))
            .await
            .is_ok()
        {
            return;
        }

        let reason = format!(
            "admission not confirmed within {}s",
            self.inner.timings.admission_timeout.as_secs()
        );
        self.abandon_admission(id, reason).await;
    }

    async fn await_admission(&self, id: &str, mut budget: AdmissionBudget) {
        let timings = &self.inner.timings;

        loop {
            sleep(timings.admission_poll).await;

            match self.check_admission(id).await {
                Check::Admitted | Check::Done => return,
                Check::Waiting => continue,
                Check::Reconnect => {}
            }

            if budget.reconnects >= timings.reconnect_attempts {
                let reason = format!(
                    "bot disconnected, gave up after {} reconnect attempts",
                    budget.reconnects
                );
                self.abandon_admission(id, reason).await;
                return;
            }
            budget.reconnects += 1;

            let Some(session) = self.inner.registry.get(id).await else {
                return;
            };
            warn!(
                "Bot left meeting {}, reconnecting ({}/{})",
                session.meeting_ref, budget.reconnects, timings.reconnect_attempts
            );
            self.teardown_bot(&session.meeting_ref).await;
            self.clear_bot(id).await;
            sleep(timings.reconnect_wait).await;

            match self.request_bot(id, Some(budget)).await {
                JoinOutcome::Failed(reason) => {
                    warn!("Reconnect for session {} failed: {}", id, reason);
                }
                // A new monitor took over, or the session is finished.
                _ => return,
            }
        }
    }

    /// Fail a session whose bot never got in, and remove whatever bot is left.
    async fn abandon_admission(&self, id: &str, reason: String) {
        let failed = self
            .inner
            .registry
            .update(id, |s| {
                if !matches!(s.state, SessionState::BotJoining | SessionState::Failed) {
                    return None;
                }
                s.fail(reason.clone());
                s.bot_id = None;
                Some(s.meeting_ref.clone())
            })
            .await
            .flatten();

        if let Some(meeting_ref) = failed {
            error!("Session {} failed: {}", id, reason);
            self.teardown_bot(&meeting_ref).await;
        }
    }

    async fn check_admission(&self, id: &str) -> Check {
        let Some(session) = self.inner.registry.get(id).await else {
            return Check::Done;
        };
        if !matches!(
            session.state,
            SessionState::BotJoining | SessionState::Failed
        ) {
            return Check::Done;
        }

        if let Verification::Active { bot_id } = self.verify(&session).await {
            self.enter_in_progress(id, bot_id).await;
            return Check::Admitted;
        }

        let lookup = match &session.bot_id {
            Some(bot_id) => BotLookup::ById(bot_id),
            None => BotLookup::ByMeeting(&session.meeting_ref),
        };
        match self.inner.gateway.status(lookup).await {
            Ok(Some(bot)) => match bot.phase {
                BotPhase::Disconnected => {
                    info!(
                        "Bot for meeting {} reports {}",
                        session.meeting_ref, bot.raw_status
                    );
                    Check::Reconnect
                }
                phase => {
                    debug!(
                        "Bot for meeting {} still {} ({})",
                        session.meeting_ref,
                        phase.as_str(),
                        bot.raw_status
                    );
                    Check::Waiting
                }
            },
            Ok(None) if session.bot_id.is_none() => Check::Reconnect,
            Ok(None) => {
                debug!("No status yet for bot in meeting {}", session.meeting_ref);
                Check::Waiting
            }
            Err(e) => {
                warn!(
                    "Admission check failed for meeting {}: {}",
                    session.meeting_ref, e
                );
                Check::Waiting
            }
        }
    }
}
