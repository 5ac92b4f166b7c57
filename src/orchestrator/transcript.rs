use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{Orchestrator, TaskKind};
use crate::delivery::DeliveryPayload;
use crate::session::SessionState;

const FINAL_FETCH_ATTEMPTS: u32 = 3;
const FINAL_FETCH_RETRY_DELAY: Duration = Duration::from_secs(2);

impl Orchestrator {
    pub(super) fn spawn_transcript_monitor(&self, id: &str) {
        let this = self.clone();
        let session_id = id.to_string();
        self.inner.tasks.spawn(id, TaskKind::Monitor, async move {
            this.monitor_transcript(&session_id).await;
        });
    }

    /// Poll the transcript while the session is in progress, then finalize.
    ///
    /// Monitoring stops when the gateway reports the meeting over or when the
    /// meeting has run `max_meeting` past its scheduled start.
    pub(super) async fn monitor_transcript(&self, id: &str) {
        let timings = &self.inner.timings;

        loop {
            let Some(session) = self.inner.registry.get(id).await else {
                return;
            };
            if session.state != SessionState::InProgress || session.end_time.is_some() {
                return;
            }

            let elapsed = (self.now() - session.start_time)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed >= timings.max_meeting {
                info!(
                    "Meeting {} reached the {}s ceiling, stopping",
                    session.meeting_ref,
                    timings.max_meeting.as_secs()
                );
                break;
            }

            match self.inner.gateway.transcript(&session.meeting_ref).await {
                Ok(snapshot) => {
                    let stored = self
                        .inner
                        .registry
                        .update(id, |s| s.record_transcript(&snapshot.text))
                        .await
                        .unwrap_or(false);
                    if stored {
                        debug!(
                            "Transcript for meeting {} now {} chars",
                            session.meeting_ref,
                            snapshot.text.trim().len()
                        );
                    }
                    if snapshot.meeting_ended {
                        info!("Meeting {} has ended", session.meeting_ref);
                        break;
                    }
                }
                Err(e) => warn!(
                    "Transcript fetch failed for meeting {}: {}",
                    session.meeting_ref, e
                ),
            }

            sleep(timings.transcript_poll.min(timings.max_meeting - elapsed)).await;
        }

        self.finalize(id).await;
    }

    /// Stamp the end time, try once more for a transcript, complete the session
    /// and deliver the result.
    ///
    /// Only the first caller for a session does anything; later calls return `None`.
    pub async fn finalize(&self, id: &str) -> Option<SessionState> {
        let now = self.now();
        let claimed = self
            .inner
            .registry
            .update(id, |s| {
                if s.state != SessionState::InProgress || s.end_time.is_some() {
                    return false;
                }
                s.end_time = Some(now);
                true
            })
            .await
            .unwrap_or(false);
        if !claimed {
            debug!("Session {} already finalized or not in progress", id);
            return None;
        }

        let session = self.inner.registry.get(id).await?;
        if !session.has_transcript() {
            self.fetch_final_transcript(id, &session.meeting_ref).await;
        }

        // The meeting is over either way; a missing transcript does not fail it.
        if !self
            .inner
            .registry
            .transition(id, SessionState::Completed)
            .await
        {
            self.fail(id, "could not complete session".to_string()).await;
        }

        let session = self.inner.registry.get(id).await?;
        info!(
            "Session {} for meeting {} finalized as {}",
            id, session.meeting_ref, session.state
        );

        let payload = DeliveryPayload::from_session(&session, &self.inner.profile.name);
        self.inner.delivery.deliver(&payload).await;
        Some(session.state)
    }

    /// Last attempt at a transcript for a meeting that has ended.
    async fn fetch_final_transcript(&self, id: &str, meeting_ref: &str) {
        for attempt in 1..=FINAL_FETCH_ATTEMPTS {
            match self.inner.gateway.transcript(meeting_ref).await {
                Ok(snapshot) => {
                    let stored = self
                        .inner
                        .registry
                        .update(id, |s| s.record_transcript(&snapshot.text))
                        .await
                        .unwrap_or(false);
                    if !stored {
                        warn!("No transcript available for meeting {} at its end", meeting_ref);
                    }
                    return;
                }
                Err(e) if e.is_retryable() && attempt < FINAL_FETCH_ATTEMPTS => {
                    warn!(
                        "Final transcript fetch for meeting {} failed ({}/{}): {}",
                        meeting_ref, attempt, FINAL_FETCH_ATTEMPTS, e
                    );
                    sleep(FINAL_FETCH_RETRY_DELAY).await;
                }
                Err(e) => {
                    warn!(
                        "Final transcript fetch for meeting {} failed, completing without one: {}",
                        meeting_ref, e
                    );
                    return;
                }
            }
        }
    }
}
