use crate::app::{self, ServiceLock};
use crate::config::Config;
use crate::global;
use crate::session::{SessionStore, SessionSummary};
use anyhow::{anyhow, Result};
use chrono::Utc;
use tracing::{error, info};

use super::args::{JoinCliArgs, StatusCliArgs};

pub async fn handle_status_command(args: StatusCliArgs) -> Result<()> {
    let store = SessionStore::new(global::sessions_file()?);
    let mut sessions: Vec<SessionSummary> = store
        .load()
        .await
        .values()
        .map(|s| s.summary())
        .collect();
    sessions.sort_by_key(|s| s.start_time);

    if let Some(id) = &args.id {
        sessions.retain(|s| &s.id == id);
        if sessions.is_empty() {
            return Err(anyhow!("Session {} not found", id));
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No active sessions.");
        return Ok(());
    }

    println!("{} session(s):\n", sessions.len());
    for session in sessions {
        println!("ID: {}", session.id);
        println!("Meeting: {} ({})", session.meeting_ref, session.meeting_url);
        println!("Start: {}", session.start_time);
        if let Some(end) = session.end_time {
            println!("End: {}", end);
        }
        println!("State: {}", session.state);
        println!(
            "Bot: {}, transcript: {}, join attempts: {}",
            if session.has_bot { "yes" } else { "no" },
            if session.has_transcript { "yes" } else { "no" },
            session.join_retries
        );
        if let Some(error) = &session.error {
            println!("Error: {}", error);
        }
        println!("---");
    }

    Ok(())
}

/// Register the meeting, start joining right away and keep the sweep running until
/// the session is finalized, retired or the user interrupts.
pub async fn handle_join_command(args: JoinCliArgs, config: Config) -> Result<()> {
    config.validate()?;
    let _lock = ServiceLock::acquire(global::lock_file()?).await?;

    let registry = app::open_registry().await?;
    let orchestrator = app::build_orchestrator(&config, registry);

    let start_time = args.start_time.unwrap_or_else(Utc::now);
    let id = orchestrator.trigger(&args.meeting_url, start_time).await?;
    println!("Session {} registered for {}", id, args.meeting_url);
    orchestrator.join_now(&id).await;

    let poll = orchestrator.timings().sweep_interval;
    let watched = orchestrator.clone();
    let session_id = id.clone();
    let finished = async move {
        loop {
            tokio::time::sleep(poll).await;
            match watched.status(&session_id).await {
                // Finalized, and delivery is no longer running.
                Some(summary)
                    if summary.end_time.is_some() && !watched.tasks().has_any(&session_id) =>
                {
                    info!("Session {} finished as {}", session_id, summary.state);
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }
    };

    orchestrator
        .run(async {
            tokio::select! {
                _ = finished => {}
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                }
            }
        })
        .await;

    match orchestrator.status(&id).await {
        Some(summary) => println!("Session {} is {}", id, summary.state),
        None => println!("Session {} retired", id),
    }
    Ok(())
}
