use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, PostParams},
    config::KubeConfigOptions,
    error::ErrorResponse,
    runtime::{WatchStreamExt, watcher},
};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::{
    error::{Error, Result},
    watch::{EventTranslator, SecretWatch},
};

/// The slice of the cluster API the mirror needs. Shared by every session, so
/// implementations must tolerate concurrent use.
#[async_trait]
pub trait SecretApi: Send + Sync {
    /// Returns `None` when the secret does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<()>;

    /// Replaces the stored object with `secret`.
    async fn update(&self, namespace: &str, secret: &Secret) -> Result<()>;

    /// Deleting a secret that does not exist succeeds.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Starts watching a single secret. Must be called within a tokio runtime.
    fn watch(&self, namespace: &str, name: &str) -> SecretWatch;
}

pub async fn connect() -> Result<Client> {
    let options = KubeConfigOptions::default();

    // Load kubeconfig if it's present otherwise fall back to cluster config
    let config = kube::Config::from_kubeconfig(&options)
        .await
        .or_else(|_| kube::Config::incluster())
        .map_err(|e| Error::Connect(e.into()))?;

    Client::try_from(config).map_err(|e| Error::Connect(e.into()))
}

#[derive(Clone)]
pub struct KubeSecretApi {
    client: Client,
}

impl KubeSecretApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretApi for KubeSecretApi {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<()> {
        self.api(namespace)
            .create(&PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn update(&self, namespace: &str, secret: &Secret) -> Result<()> {
        self.api(namespace)
            .replace(&secret.name_any(), &PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            // Already gone
            Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn watch(&self, namespace: &str, name: &str) -> SecretWatch {
        let api = self.api(namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={name}"));
        let name = name.to_owned();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut translator = EventTranslator::default();
            let mut stream = watcher(api, config).default_backoff().boxed();

            while let Some(res) = stream.next().await {
                match res {
                    Ok(event) => {
                        for event in translator.translate(event) {
                            if tx.send(event).is_err() {
                                debug!("Watch receiver for secret '{}' dropped", name);
                                return;
                            }
                        }
                    }
                    Err(e) => error!("Watcher error for secret '{}': {}", name, e),
                }
            }
        });

        SecretWatch::new(rx).with_task(task)
    }
}
