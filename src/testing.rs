//! In-memory cluster for exercising sessions without an API server.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use k8s_openapi::{ByteString, api::core::v1::Secret};
use kube::{api::ObjectMeta, error::ErrorResponse};
use tokio::sync::{Notify, mpsc};
use tokio_retry2::{Retry, RetryError, strategy::FixedInterval};

use crate::{
    client::SecretApi,
    error::{Error, Result},
    watch::{SecretWatch, WatchEvent},
};

/// Builds a secret holding `value` under the key `k`.
pub fn secret(namespace: &str, name: &str, value: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            "k".to_owned(),
            ByteString(value.as_bytes().to_vec()),
        )])),
        ..Secret::default()
    }
}

/// Polls `check` until it holds, giving up after a couple of seconds.
pub async fn eventually(check: impl Fn() -> bool) {
    let strategy = FixedInterval::from_millis(10).take(300);

    Retry::spawn(strategy, async || -> Result<(), RetryError<()>> {
        if check() {
            Ok(())
        } else {
            Err(RetryError::transient(()))
        }
    })
    .await
    .expect("condition never held");
}

/// A write the fake was asked to perform, whether or not it succeeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Create { namespace: String, name: String },
    Update { namespace: String, name: String },
    Delete { namespace: String, name: String },
}

impl Call {
    pub fn create(namespace: &str, name: &str) -> Self {
        Self::Create {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        }
    }

    pub fn update(namespace: &str, name: &str) -> Self {
        Self::Update {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        }
    }

    pub fn delete(namespace: &str, name: &str) -> Self {
        Self::Delete {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

struct Watcher {
    namespace: String,
    name: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), Secret>,
    calls: Vec<Call>,
    failing: BTreeSet<String>,
    watchers: Vec<Watcher>,
    held: BTreeSet<(String, String)>,
    gates: BTreeMap<String, Arc<Notify>>,
    parked: Vec<String>,
    version: u64,
}

impl State {
    fn store(&mut self, mut secret: Secret) -> (Secret, Option<Secret>) {
        self.version += 1;
        secret.metadata.resource_version = Some(self.version.to_string());
        let key = (
            secret.metadata.namespace.clone().unwrap_or_default(),
            secret.metadata.name.clone().unwrap_or_default(),
        );
        let previous = self.objects.insert(key, secret.clone());
        (secret, previous)
    }

    fn stored(&mut self, secret: Secret) {
        let (namespace, name) = (
            secret.metadata.namespace.clone().unwrap_or_default(),
            secret.metadata.name.clone().unwrap_or_default(),
        );
        let event = match self.store(secret) {
            (new, Some(old)) => WatchEvent::Updated { old, new },
            (new, None) => WatchEvent::Added(new),
        };
        self.notify(&namespace, &name, event);
    }

    fn removed(&mut self, namespace: &str, name: &str) {
        if let Some(old) = self
            .objects
            .remove(&(namespace.to_owned(), name.to_owned()))
        {
            self.notify(namespace, name, WatchEvent::Deleted(old));
        }
    }

    fn notify(&mut self, namespace: &str, name: &str, event: WatchEvent) {
        self.watchers.retain(|w| {
            if w.namespace != namespace || w.name != name {
                return true;
            }
            w.tx.send(event.clone()).is_ok()
        });
    }

    fn check(&self, namespace: &str) -> Result<()> {
        if self.failing.contains(namespace) {
            return Err(api_error(500, "InternalError", "injected failure"));
        }
        Ok(())
    }
}

fn api_error(code: u16, reason: &str, message: &str) -> Error {
    Error::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: message.to_owned(),
        reason: reason.to_owned(),
        code,
    }))
}

#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watches opened on `namespace/name` report their initial listing as
    /// complete only once [`FakeCluster::release_sync`] is called.
    pub fn hold_sync(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .held
            .insert((namespace.to_owned(), name.to_owned()));
    }

    /// Writes `secret` as an outside client would.
    pub fn put(&self, secret: Secret) {
        self.state.lock().unwrap().stored(secret);
    }

    /// Deletes a secret as an outside client would.
    pub fn delete_external(&self, namespace: &str, name: &str) {
        self.state.lock().unwrap().removed(namespace, name);
    }

    /// Sends a raw event to the watches on `namespace/name`.
    pub fn emit(&self, namespace: &str, name: &str, event: WatchEvent) {
        self.state.lock().unwrap().notify(namespace, name, event);
    }

    pub fn release_sync(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.held.remove(&(namespace.to_owned(), name.to_owned()));
        state.notify(namespace, name, WatchEvent::Synced);
    }

    /// Whether a watch on `namespace/name` is open.
    pub fn is_watched(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .watchers
            .iter()
            .any(|w| w.namespace == namespace && w.name == name)
    }

    /// Writes to `namespace` wait until [`FakeCluster::resume_writes`].
    pub fn pause_writes(&self, namespace: &str) {
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(namespace.to_owned(), Arc::new(Notify::new()));
    }

    pub fn resume_writes(&self, namespace: &str) {
        let gate = self.state.lock().unwrap().gates.remove(namespace);
        if let Some(gate) = gate {
            gate.notify_one();
        }
    }

    /// Namespaces with a write currently waiting on a paused gate.
    pub fn parked(&self) -> Vec<String> {
        self.state.lock().unwrap().parked.clone()
    }

    async fn pass_gate(&self, namespace: &str) {
        let gate = self.state.lock().unwrap().gates.get(namespace).cloned();
        if let Some(gate) = gate {
            self.state.lock().unwrap().parked.push(namespace.to_owned());
            gate.notified().await;
            self.state
                .lock()
                .unwrap()
                .parked
                .retain(|ns| ns != namespace);
        }
    }

    /// Ends every open watch.
    pub fn close_watches(&self) {
        self.state.lock().unwrap().watchers.clear();
    }

    pub fn fail_namespace(&self, namespace: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(namespace.to_owned());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn object(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    /// The value stored under key `k`, if the secret exists.
    pub fn payload(&self, namespace: &str, name: &str) -> Option<String> {
        let secret = self.object(namespace, name)?;
        let value = secret.data?.remove("k")?;
        String::from_utf8(value.0).ok()
    }

    /// Namespaces that currently hold a secret called `name`.
    pub fn namespaces_with(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(_, n)| n == name)
            .map(|(ns, _)| ns.clone())
            .collect()
    }
}

#[async_trait]
impl SecretApi for FakeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.state.lock().unwrap().check(namespace)?;
        Ok(self.object(namespace, name))
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<()> {
        self.pass_gate(namespace).await;
        let mut state = self.state.lock().unwrap();
        let name = secret.metadata.name.clone().unwrap_or_default();
        state.calls.push(Call::create(namespace, &name));
        state.check(namespace)?;

        if state
            .objects
            .contains_key(&(namespace.to_owned(), name.clone()))
        {
            return Err(api_error(409, "AlreadyExists", "secret already exists"));
        }
        state.stored(secret.clone());
        Ok(())
    }

    async fn update(&self, namespace: &str, secret: &Secret) -> Result<()> {
        self.pass_gate(namespace).await;
        let mut state = self.state.lock().unwrap();
        let name = secret.metadata.name.clone().unwrap_or_default();
        state.calls.push(Call::update(namespace, &name));
        state.check(namespace)?;

        if !state
            .objects
            .contains_key(&(namespace.to_owned(), name.clone()))
        {
            return Err(api_error(404, "NotFound", "secret not found"));
        }
        state.stored(secret.clone());
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.pass_gate(namespace).await;
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::delete(namespace, name));
        state.check(namespace)?;

        state.removed(namespace, name);
        Ok(())
    }

    fn watch(&self, namespace: &str, name: &str) -> SecretWatch {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state
            .objects
            .get(&(namespace.to_owned(), name.to_owned()))
        {
            let _ = tx.send(WatchEvent::Added(existing.clone()));
        }
        if !state.held.contains(&(namespace.to_owned(), name.to_owned())) {
            let _ = tx.send(WatchEvent::Synced);
        }
        state.watchers.push(Watcher {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            tx,
        });

        SecretWatch::new(rx)
    }
}
