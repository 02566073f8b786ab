use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Secret;
use kube::{ResourceExt, runtime::watcher};
use tokio::{sync::mpsc, task::JoinHandle};

/// A notification about the watched secret, in the order the watch observed it.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    Added(Secret),
    Updated { old: Secret, new: Secret },
    Deleted(Secret),
    /// The watch finished listing the current state. Sent after the initial
    /// listing and after every re-list.
    Synced,
}

impl WatchEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "add",
            Self::Updated { .. } => "update",
            Self::Deleted(_) => "delete",
            Self::Synced => "synced",
        }
    }
}

/// Receiving end of a watch on a single secret. Dropping it stops the task
/// feeding it.
pub struct SecretWatch {
    events: mpsc::UnboundedReceiver<WatchEvent>,
    task: Option<JoinHandle<()>>,
}

impl SecretWatch {
    pub fn new(events: mpsc::UnboundedReceiver<WatchEvent>) -> Self {
        Self { events, task: None }
    }

    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Next event, or `None` once the watch has ended.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }
}

impl Drop for SecretWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Turns raw watcher events into add/update/delete notifications by
/// remembering the last object seen under each name.
#[derive(Default)]
pub struct EventTranslator {
    known: BTreeMap<String, Secret>,
    relisted: Option<BTreeSet<String>>,
}

impl EventTranslator {
    pub fn translate(&mut self, event: watcher::Event<Secret>) -> Vec<WatchEvent> {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(BTreeSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(secret) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(secret.name_any());
                }
                vec![self.applied(secret)]
            }
            watcher::Event::InitDone => {
                let relisted = self.relisted.take().unwrap_or_default();
                let gone: Vec<String> = self
                    .known
                    .keys()
                    .filter(|name| !relisted.contains(*name))
                    .cloned()
                    .collect();

                let mut events: Vec<WatchEvent> = gone
                    .into_iter()
                    .filter_map(|name| self.known.remove(&name))
                    .map(WatchEvent::Deleted)
                    .collect();
                events.push(WatchEvent::Synced);
                events
            }
            watcher::Event::Apply(secret) => vec![self.applied(secret)],
            watcher::Event::Delete(secret) => {
                self.known.remove(&secret.name_any());
                vec![WatchEvent::Deleted(secret)]
            }
        }
    }

    fn applied(&mut self, secret: Secret) -> WatchEvent {
        match self.known.insert(secret.name_any(), secret.clone()) {
            Some(old) => WatchEvent::Updated { old, new: secret },
            None => WatchEvent::Added(secret),
        }
    }
}
