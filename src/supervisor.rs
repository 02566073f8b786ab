use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    client::SecretApi,
    copier::{self, FanOut},
    coordinator::Session,
    error::{Error, Result},
    mirror::MirrorSpec,
};

/// How one session ended.
#[derive(Debug)]
pub struct SessionReport {
    pub secret: String,
    pub result: Result<()>,
}

/// Brings every target of `spec` in line with the source once.
pub async fn initial_sync(client: &dyn SecretApi, spec: &MirrorSpec) -> Result<FanOut> {
    let report = copier::mirror_source(client, spec).await?;
    if report.failed == 0 {
        info!("Secret '{}' is synced in all namespaces", spec.name);
    } else {
        warn!(
            "Secret '{}' is synced in {}/{} namespaces",
            spec.name,
            report.succeeded,
            report.succeeded + report.failed
        );
    }
    Ok(report)
}

/// Runs [`initial_sync`] for each spec in turn. Failures are logged and do not
/// stop the remaining specs.
pub async fn run_initial_sync(client: &dyn SecretApi, specs: &[MirrorSpec]) {
    for spec in specs {
        if let Err(e) = initial_sync(client, spec).await {
            error!("Initial sync of secret '{}' failed: {}", spec.name, e);
        }
    }
}

/// Starts one session per spec and waits until all of them have stopped.
/// Cancelling `cancel` drains and stops every session.
pub async fn run_watch_sessions(
    client: Arc<dyn SecretApi>,
    specs: &[MirrorSpec],
    sync_timeout: Duration,
    cancel: CancellationToken,
) -> Vec<SessionReport> {
    let (names, handles): (Vec<String>, Vec<_>) = specs
        .iter()
        .map(|spec| {
            let session = Session::new(spec.clone(), client.clone(), sync_timeout);
            let name = session.spec().name.clone();
            (name, tokio::spawn(session.run(cancel.child_token())))
        })
        .unzip();

    info!("Started {} watch sessions", handles.len());

    names
        .into_iter()
        .zip(join_all(handles).await)
        .enumerate()
        .map(|(worker, (secret, joined))| {
            let result = joined.unwrap_or_else(|e| {
                Err(Error::SessionPanicked {
                    name: secret.clone(),
                    reason: e.to_string(),
                })
            });

            match &result {
                Ok(()) => info!(worker, "Session for secret '{}' stopped", secret),
                Err(e) => error!(worker, "Session for secret '{}' failed: {}", secret, e),
            }
            SessionReport { secret, result }
        })
        .collect()
}
