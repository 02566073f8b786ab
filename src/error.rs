use std::{path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to read mirror config '{}': {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unable to parse mirror config '{}': {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid mirror config: {0}")]
    InvalidConfig(String),

    #[error("unable to connect to cluster")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("source secret '{namespace}/{name}' not found")]
    SourceMissing { namespace: String, name: String },

    #[error("timed out after {timeout:?} waiting for initial listing of secret '{name}'")]
    SyncTimeout { name: String, timeout: Duration },

    #[error("watch for secret '{0}' closed before initial listing completed")]
    WatchClosed(String),

    #[error("session for secret '{name}' failed to complete: {reason}")]
    SessionPanicked { name: String, reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
