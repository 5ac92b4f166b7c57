//! Fresh confirmation that a bot is live in a specific meeting.
//!
//! Nothing here is cached: the gateway may hand out a new bot id whenever a bot is
//! recreated, so every decision that depends on "is the bot in?" asks again.

use std::sync::Arc;
use tracing::debug;

use crate::gateway::{BotGateway, BotLookup, BotPhase, BotStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// An active bot for the meeting was found; carries its current id when known.
    Active { bot_id: Option<String> },
    Inactive,
}

#[derive(Clone)]
pub struct Verifier {
    gateway: Arc<dyn BotGateway>,
}

impl Verifier {
    pub fn new(gateway: Arc<dyn BotGateway>) -> Self {
        Self { gateway }
    }

    /// Try the meeting lookup, then the bot id lookup, then the full list.
    ///
    /// Transport errors on one stage fall through to the next; a bot only counts
    /// when it reports the meeting and an active status.
    pub async fn verify(&self, meeting_ref: &str, bot_id: Option<&str>) -> Verification {
        match self.gateway.status(BotLookup::ByMeeting(meeting_ref)).await {
            Ok(Some(bot)) if is_live_in(&bot, meeting_ref) => return active(bot),
            Ok(_) => {}
            Err(e) => debug!("Meeting lookup failed for {}: {}", meeting_ref, e),
        }

        if let Some(bot_id) = bot_id {
            match self.gateway.status(BotLookup::ById(bot_id)).await {
                Ok(Some(bot)) if is_live_in(&bot, meeting_ref) => return active(bot),
                Ok(_) => {}
                Err(e) => debug!("Bot lookup failed for {}: {}", bot_id, e),
            }
        }

        match self.gateway.list().await {
            Ok(bots) => {
                if let Some(bot) = pick_live(bots, meeting_ref) {
                    return active(bot);
                }
            }
            Err(e) => debug!("Bot listing failed while verifying {}: {}", meeting_ref, e),
        }

        Verification::Inactive
    }
}

fn is_live_in(bot: &BotStatus, meeting_ref: &str) -> bool {
    bot.is_for_meeting(meeting_ref) && bot.phase == BotPhase::Active
}

fn active(bot: BotStatus) -> Verification {
    Verification::Active { bot_id: bot.bot_id }
}

/// Among several live bots for one meeting, the most recently created wins.
/// Bots without a creation time rank last; ties keep list order.
fn pick_live(bots: Vec<BotStatus>, meeting_ref: &str) -> Option<BotStatus> {
    let mut best: Option<BotStatus> = None;
    for bot in bots.into_iter().filter(|bot| is_live_in(bot, meeting_ref)) {
        let newer = match &best {
            None => true,
            Some(current) => match (bot.created_at, current.created_at) {
                (Some(candidate), Some(current)) => candidate > current,
                (Some(_), None) => true,
                _ => false,
            },
        };
        if newer {
            best = Some(bot);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{BotRequest, CreateOutcome, GatewayError, TranscriptSnapshot};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubGateway {
        by_meeting: Option<Result<Option<BotStatus>, GatewayError>>,
        by_id: Option<Result<Option<BotStatus>, GatewayError>>,
        listed: Option<Result<Vec<BotStatus>, GatewayError>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BotGateway for StubGateway {
        async fn create(&self, _: &BotRequest) -> Result<CreateOutcome, GatewayError> {
            unreachable!("verification never creates bots")
        }

        async fn delete(&self, _: &str) -> Result<(), GatewayError> {
            unreachable!("verification never deletes bots")
        }

        async fn status(&self, lookup: BotLookup<'_>) -> Result<Option<BotStatus>, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let slot = match lookup {
                BotLookup::ByMeeting(_) => &self.by_meeting,
                BotLookup::ById(_) => &self.by_id,
            };
            slot.clone().unwrap_or(Ok(None))
        }

        async fn list(&self) -> Result<Vec<BotStatus>, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.listed.clone().unwrap_or(Ok(Vec::new()))
        }

        async fn transcript(&self, _: &str) -> Result<TranscriptSnapshot, GatewayError> {
            Ok(TranscriptSnapshot::default())
        }
    }

    fn bot(id: &str, meeting: &str, status: &str) -> BotStatus {
        BotStatus {
            bot_id: Some(id.to_string()),
            meeting_ref: Some(meeting.to_string()),
            phase: BotPhase::from_raw(status),
            raw_status: status.to_string(),
            created_at: None,
        }
    }

    fn verifier(stub: StubGateway) -> (Verifier, Arc<StubGateway>) {
        let stub = Arc::new(stub);
        (Verifier::new(stub.clone()), stub)
    }

    #[tokio::test]
    async fn test_meeting_lookup_short_circuits() {
        let (verifier, stub) = verifier(StubGateway {
            by_meeting: Some(Ok(Some(bot("b1", "abc", "active")))),
            ..Default::default()
        });

        let result = verifier.verify("abc", Some("b1")).await;
        assert_eq!(
            result,
            Verification::Active {
                bot_id: Some("b1".to_string())
            }
        );
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_waiting_bot_is_not_active() {
        let (verifier, _) = verifier(StubGateway {
            by_meeting: Some(Ok(Some(bot("b1", "abc", "waiting_for_admission")))),
            by_id: Some(Ok(Some(bot("b1", "abc", "pending")))),
            ..Default::default()
        });
        assert_eq!(verifier.verify("abc", Some("b1")).await, Verification::Inactive);
    }

    #[tokio::test]
    async fn test_identity_must_match() {
        let (verifier, _) = verifier(StubGateway {
            by_id: Some(Ok(Some(bot("b1", "someone-else", "active")))),
            listed: Some(Ok(vec![bot("b2", "other", "active")])),
            ..Default::default()
        });
        assert_eq!(verifier.verify("abc", Some("b1")).await, Verification::Inactive);
    }

    #[tokio::test]
    async fn test_falls_back_through_errors_to_list() {
        let (verifier, stub) = verifier(StubGateway {
            by_meeting: Some(Err(GatewayError::Timeout("slow".into()))),
            by_id: Some(Err(GatewayError::Transport("reset".into()))),
            listed: Some(Ok(vec![bot("b3", "abc", "connected")])),
            ..Default::default()
        });

        let result = verifier.verify("abc", Some("b1")).await;
        assert_eq!(
            result,
            Verification::Active {
                bot_id: Some("b3".to_string())
            }
        );
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_skips_id_lookup_without_bot_reference() {
        let (verifier, stub) = verifier(StubGateway::default());
        assert_eq!(verifier.verify("abc", None).await, Verification::Inactive);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_verification_is_idempotent() {
        let (verifier, _) = verifier(StubGateway {
            listed: Some(Ok(vec![bot("b3", "abc", "active")])),
            ..Default::default()
        });
        let first = verifier.verify("abc", None).await;
        let second = verifier.verify("abc", None).await;
        assert_eq!(first, second);
        assert!(matches!(first, Verification::Active { .. }));
    }

    #[test]
    fn test_list_prefers_most_recent_bot() {
        let mut old = bot("old", "abc", "active");
        old.created_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        let mut new = bot("new", "abc", "active");
        new.created_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 5, 0).unwrap());
        let undated = bot("undated", "abc", "active");

        let picked = pick_live(vec![undated, old, new, bot("x", "other", "active")], "abc");
        assert_eq!(picked.unwrap().bot_id.as_deref(), Some("new"));
    }

    #[test]
    fn test_list_first_match_without_timestamps() {
        let picked = pick_live(
            vec![bot("first", "abc", "active"), bot("second", "abc", "active")],
            "abc",
        );
        assert_eq!(picked.unwrap().bot_id.as_deref(), Some("first"));
    }
}
