use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// One secret to mirror from `source_namespace` into every namespace of
/// `target_namespaces`. The same name is used in the source and all targets.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorSpec {
    pub name: String,
    pub source_namespace: String,
    #[serde(default)]
    pub target_namespaces: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MirrorList {
    #[serde(default)]
    secrets: Vec<MirrorSpec>,
}

impl MirrorSpec {
    pub fn new(
        name: impl Into<String>,
        source_namespace: impl Into<String>,
        target_namespaces: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            source_namespace: source_namespace.into(),
            target_namespaces: target_namespaces.into_iter().map(Into::into).collect(),
        }
    }

    /// Checks the invariants every spec must hold before a session can own it
    /// and drops repeated target namespaces.
    pub fn validate(mut self) -> Result<Self> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("secret name must not be empty".into()));
        }
        if self.source_namespace.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "secret '{}' has an empty sourceNamespace",
                self.name
            )));
        }
        if self.target_namespaces.contains(&self.source_namespace) {
            return Err(Error::InvalidConfig(format!(
                "secret '{}' lists its source namespace '{}' as a target",
                self.name, self.source_namespace
            )));
        }

        let mut seen = Vec::with_capacity(self.target_namespaces.len());
        for ns in self.target_namespaces.drain(..) {
            if seen.contains(&ns) {
                warn!("Secret '{}' lists target namespace '{}' more than once", self.name, ns);
            } else {
                seen.push(ns);
            }
        }
        self.target_namespaces = seen;

        Ok(self)
    }
}

/// Parses and validates a YAML list of mirror specs.
pub fn parse_specs(path: &Path, contents: &str) -> Result<Vec<MirrorSpec>> {
    let list: MirrorList = serde_yaml::from_str(contents).map_err(|source| Error::ConfigParse {
        path: path.to_owned(),
        source,
    })?;

    list.secrets.into_iter().map(MirrorSpec::validate).collect()
}

/// Reads the mirror spec list from disk.
pub fn load_specs(path: &Path) -> Result<Vec<MirrorSpec>> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_owned(),
        source,
    })?;

    let specs = parse_specs(path, &contents)?;
    debug!("Loaded mirror specs: {:?}", specs);

    Ok(specs)
}
