//! Seed manifest for the standalone binary.
//!
//! A manifest is a JSON document naming provider configs (credential sets)
//! and the managed resources to load into the store at startup:
//!
//! ```json
//! {
//!   "providerConfigs": { "default": { "subscription_id": "sub-1" } },
//!   "objects": [
//!     { "kind": "DatabaseServer",
//!       "metadata": { "name": "db1", "namespace": "default" },
//!       "spec": { "forProvider": { "region": "eastus", "tier": "Basic",
//!                                  "administratorLogin": "admin" } } }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::external::Credentials;
use crate::kinds;
use crate::resource::DynamicObject;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("object {name} has unsupported kind {kind:?}")]
    UnknownKind { kind: String, name: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub provider_configs: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub objects: Vec<DynamicObject>,
}

impl Manifest {
    /// Read and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest =
            serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        for object in &self.objects {
            let Some(info) = kinds::lookup(&object.kind) else {
                return Err(ManifestError::UnknownKind {
                    kind: object.kind.clone(),
                    name: object.key().to_string(),
                });
            };
            if !info.publishes_secret && !object.spec["writeConnectionSecretToRef"].is_null() {
                warn!(
                    "{} {} names a connection secret, but {} publishes none",
                    object.kind,
                    object.key(),
                    info.kind
                );
            }
        }
        Ok(())
    }

    /// Provider configs as credential sets.
    pub fn credentials(&self) -> impl Iterator<Item = (&str, Credentials)> {
        self.provider_configs.iter().map(|(name, values)| {
            let credentials = values
                .iter()
                .fold(Credentials::new(), |creds, (k, v)| creds.with(k, v));
            (name.as_str(), credentials)
        })
    }
}
