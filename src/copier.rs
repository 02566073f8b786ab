use futures::future::join_all;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use tracing::{error, info};

use crate::{
    client::SecretApi,
    error::{Error, Result},
    mirror::MirrorSpec,
};

pub const SOURCE_NAMESPACE_LABEL: &str = "secret-mirror/source-namespace";

/// The secret that should exist in one target namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetCopy {
    namespace: String,
    secret: Secret,
}

impl TargetCopy {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }
}

/// Outcome of applying one operation to every target namespace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    pub succeeded: usize,
    pub failed: usize,
}

impl FanOut {
    fn tally(results: Vec<Result<()>>) -> Self {
        results.into_iter().fold(Self::default(), |mut acc, res| {
            match res {
                Ok(()) => acc.succeeded += 1,
                Err(_) => acc.failed += 1,
            }
            acc
        })
    }
}

/// Builds the copy of `source` that belongs in `namespace`. Payload is copied
/// verbatim; only identifying metadata is carried over.
pub fn copy(source: &Secret, spec: &MirrorSpec, namespace: &str) -> TargetCopy {
    let mut labels = source.metadata.labels.clone().unwrap_or_default();
    labels.insert(
        SOURCE_NAMESPACE_LABEL.to_owned(),
        spec.source_namespace.clone(),
    );

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(namespace.to_owned()),
            labels: Some(labels),
            annotations: source.metadata.annotations.clone(),
            ..ObjectMeta::default()
        },
        data: source.data.clone(),
        string_data: source.string_data.clone(),
        type_: source.type_.clone(),
        immutable: source.immutable,
    };

    TargetCopy {
        namespace: namespace.to_owned(),
        secret,
    }
}

/// Creates the copy if its namespace lacks it, otherwise overwrites what is there.
pub async fn ensure_present(client: &dyn SecretApi, target: &TargetCopy) -> Result<()> {
    let name = target.secret.metadata.name.as_deref().unwrap_or_default();

    let res = match client.get(&target.namespace, name).await {
        Ok(Some(_)) => client.update(&target.namespace, &target.secret).await,
        Ok(None) => client.create(&target.namespace, &target.secret).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &res {
        error!(
            secret = %name,
            namespace = %target.namespace,
            "Error mirroring secret: {}",
            e
        );
    }
    res
}

pub async fn remove(client: &dyn SecretApi, namespace: &str, name: &str) -> Result<()> {
    let res = client.delete(namespace, name).await;
    if let Err(e) = &res {
        error!(
            secret = %name,
            namespace = %namespace,
            "Error deleting mirrored secret: {}",
            e
        );
    }
    res
}

/// Writes a copy of `source` into every target namespace of `spec`.
pub async fn apply_all(client: &dyn SecretApi, spec: &MirrorSpec, source: &Secret) -> FanOut {
    let copies: Vec<TargetCopy> = spec
        .target_namespaces
        .iter()
        .map(|ns| copy(source, spec, ns))
        .collect();

    let report = FanOut::tally(
        join_all(copies.iter().map(|target| ensure_present(client, target))).await,
    );
    info!(
        "Secret '{}' mirrored to {}/{} namespaces",
        spec.name,
        report.succeeded,
        spec.target_namespaces.len()
    );
    report
}

/// Deletes the copy from every target namespace of `spec`.
pub async fn remove_all(client: &dyn SecretApi, spec: &MirrorSpec) -> FanOut {
    let report = FanOut::tally(
        join_all(
            spec.target_namespaces
                .iter()
                .map(|ns| remove(client, ns, &spec.name)),
        )
        .await,
    );
    info!(
        "Secret '{}' removed from {}/{} namespaces",
        spec.name,
        report.succeeded,
        spec.target_namespaces.len()
    );
    report
}

/// Reads the source secret once and mirrors it into every target namespace.
pub async fn mirror_source(client: &dyn SecretApi, spec: &MirrorSpec) -> Result<FanOut> {
    let source = match client.get(&spec.source_namespace, &spec.name).await {
        Ok(Some(source)) => source,
        Ok(None) => {
            let e = Error::SourceMissing {
                namespace: spec.source_namespace.clone(),
                name: spec.name.clone(),
            };
            error!(secret = %spec.name, "Error getting secret: {}", e);
            return Err(e);
        }
        Err(e) => {
            error!(secret = %spec.name, "Error getting secret: {}", e);
            return Err(e);
        }
    };

    Ok(apply_all(client, spec, &source).await)
}
