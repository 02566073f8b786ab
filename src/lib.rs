use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod client;
pub mod config;
pub mod coordinator;
pub mod copier;
pub mod error;
pub mod mirror;
pub mod supervisor;
pub mod watch;

#[cfg(test)]
mod testing;

use client::{KubeSecretApi, SecretApi};
use config::Cli;

/// Loads the mirror specs, syncs every target once, then watches until
/// `cancel` fires and every session has drained its copies.
pub async fn run(cli: &Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    let specs = mirror::load_specs(&cli.config_path)?;
    info!("Loaded {} secrets to mirror", specs.len());

    let api: Arc<dyn SecretApi> = Arc::new(KubeSecretApi::new(client::connect().await?));

    supervisor::run_initial_sync(api.as_ref(), &specs).await;

    let reports = supervisor::run_watch_sessions(api, &specs, cli.sync_timeout(), cancel).await;

    let failed = reports.iter().filter(|r| r.result.is_err()).count();
    if failed > 0 {
        warn!("{} of {} sessions failed", failed, reports.len());
    }
    info!("All sessions stopped");

    Ok(())
}
