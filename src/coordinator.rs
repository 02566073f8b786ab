use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::{
    client::SecretApi,
    copier,
    error::{Error, Result},
    mirror::MirrorSpec,
    watch::{SecretWatch, WatchEvent},
};

/// Lifecycle of a mirroring session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Syncing,
    Watching,
    Draining,
    Stopped,
}

enum Listing {
    Complete,
    Closed,
    TimedOut,
    Cancelled,
}

/// Watches one source secret and keeps its copies in step until cancelled,
/// then removes the copies.
pub struct Session {
    spec: MirrorSpec,
    client: Arc<dyn SecretApi>,
    sync_timeout: Duration,
    phase: watch::Sender<Phase>,
    span: Span,
}

impl Session {
    pub fn new(spec: MirrorSpec, client: Arc<dyn SecretApi>, sync_timeout: Duration) -> Self {
        let (phase, _) = watch::channel(Phase::Starting);
        let span = info_span!("mirror", secret = %spec.name, source = %spec.source_namespace);

        Self {
            spec,
            client,
            sync_timeout,
            phase,
            span,
        }
    }

    pub fn spec(&self) -> &MirrorSpec {
        &self.spec
    }

    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Runs until `cancel` fires and the copies are drained, or until the
    /// initial listing fails to complete.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let span = self.span.clone();
        self.drive(cancel).instrument(span).await
    }

    async fn drive(self, cancel: CancellationToken) -> Result<()> {
        let mut watch = self
            .client
            .watch(&self.spec.source_namespace, &self.spec.name);
        self.enter(Phase::Syncing);

        let listing = tokio::select! {
            biased;

            _ = cancel.cancelled() => Listing::Cancelled,

            res = time::timeout(self.sync_timeout, wait_for_listing(&mut watch)) => match res {
                Ok(true) => Listing::Complete,
                Ok(false) => Listing::Closed,
                Err(_) => Listing::TimedOut,
            },
        };

        match listing {
            Listing::Complete => {
                self.enter(Phase::Watching);
                info!("Watching secret '{}'", self.spec.name);
                self.watch_until_cancelled(&mut watch, &cancel).await;
            }
            Listing::Cancelled => {
                info!("Cancelled before initial listing of secret '{}' completed", self.spec.name);
            }
            Listing::TimedOut => {
                error!("Timed out waiting for caches to sync");
                self.enter(Phase::Stopped);
                return Err(Error::SyncTimeout {
                    name: self.spec.name.clone(),
                    timeout: self.sync_timeout,
                });
            }
            Listing::Closed => {
                error!("Watch closed before caches synced");
                self.enter(Phase::Stopped);
                return Err(Error::WatchClosed(self.spec.name.clone()));
            }
        }

        self.enter(Phase::Draining);
        copier::remove_all(self.client.as_ref(), &self.spec).await;

        drop(watch);
        self.enter(Phase::Stopped);
        info!("Stopped");

        Ok(())
    }

    async fn watch_until_cancelled(&self, watch: &mut SecretWatch, cancel: &CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;

                _ = cancel.cancelled() => return,

                event = watch.next() => event,
            };

            match event {
                Some(event) => self.handle(event).await,
                None => {
                    warn!(
                        "Watch for secret '{}' ended, waiting for shutdown",
                        self.spec.name
                    );
                    cancel.cancelled().await;
                    return;
                }
            }
        }
    }

    async fn handle(&self, event: WatchEvent) {
        match event {
            WatchEvent::Added(_) => {
                info!("Secret '{}' has been created", self.spec.name);
                self.reconcile().await;
            }
            WatchEvent::Updated { old, new } if old == new => {
                debug!("Secret '{}' has not been changed", self.spec.name);
            }
            WatchEvent::Updated { .. } => {
                info!("Secret '{}' has been changed", self.spec.name);
                self.reconcile().await;
            }
            WatchEvent::Deleted(_) => {
                info!("Secret '{}' has been deleted", self.spec.name);
                copier::remove_all(self.client.as_ref(), &self.spec).await;
            }
            WatchEvent::Synced => debug!("Watch for secret '{}' re-listed", self.spec.name),
        }
    }

    async fn reconcile(&self) {
        // Failures are logged per namespace by the copier
        let _ = copier::mirror_source(self.client.as_ref(), &self.spec).await;
    }

    fn enter(&self, phase: Phase) {
        debug!("Session entering {:?}", phase);
        self.phase.send_replace(phase);
    }
}

/// Consumes events until the watch reports its listing complete. Anything seen
/// before then is dropped; the listing itself reflects it.
async fn wait_for_listing(watch: &mut SecretWatch) -> bool {
    while let Some(event) = watch.next().await {
        match event {
            WatchEvent::Synced => return true,
            event => debug!("Dropping {} event received before caches synced", event.kind()),
        }
    }
    false
}
