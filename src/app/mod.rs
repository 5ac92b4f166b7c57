//! Service wiring: config, working-set lock, registry, clients, API and sweep loop.

use crate::api::ApiServer;
use crate::config::Config;
use crate::delivery::{Delivery, WebhookSink};
use crate::gateway::GatewayClient;
use crate::global;
use crate::orchestrator::{BotProfile, Orchestrator, SystemClock, Timings};
use crate::session::{SessionRegistry, SessionStore};
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

pub async fn run_service(config: Config) -> Result<()> {
    info!("Starting meetbot service");
    config.validate()?;

    let _lock = ServiceLock::acquire(global::lock_file()?).await?;
    let registry = open_registry().await?;
    let orchestrator = build_orchestrator(&config, registry);

    if config.api.enabled {
        let api_server = ApiServer::new(orchestrator.clone(), &config.api);
        tokio::spawn(async move {
            if let Err(e) = api_server.start().await {
                error!("API server failed: {}", e);
            }
        });
    } else {
        info!("HTTP API disabled");
    }

    info!(
        "meetbot is ready ({} session(s) restored)",
        orchestrator.registry().len().await
    );

    orchestrator
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    Ok(())
}

/// Registry backed by the persisted snapshot in the data directory.
pub async fn open_registry() -> Result<SessionRegistry> {
    let path = global::sessions_file()?;
    debug!("Session snapshot at {}", path.display());
    Ok(SessionRegistry::load(SessionStore::new(path)).await)
}

pub fn build_orchestrator(config: &Config, registry: SessionRegistry) -> Orchestrator {
    let gateway = GatewayClient::from_config(&config.gateway);
    let sink = WebhookSink::from_config(&config.delivery);
    let delivery = Delivery::new(Arc::new(sink), config.delivery.retry_attempts);

    Orchestrator::new(
        registry,
        Arc::new(gateway),
        delivery,
        BotProfile::from_config(config),
        Timings::from_config(config),
        Arc::new(SystemClock),
    )
}

/// Exclusive hold on the working set; released on drop.
pub struct ServiceLock {
    file: File,
    path: PathBuf,
}

impl ServiceLock {
    pub async fn acquire(path: PathBuf) -> Result<Self> {
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            file.try_lock_exclusive().with_context(|| {
                format!(
                    "Another meetbot process owns {} (lock held)",
                    path.display()
                )
            })?;
            Ok(ServiceLock { file, path })
        })
        .await?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ServiceLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            debug!("Failed to release service lock: {err:?}");
        }
    }
}
