//! Store trait definitions.
//!
//! These traits abstract the API server the managed resources live in, so
//! the engine works against objects and secrets rather than a concrete
//! backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::error::Result;
use crate::resource::{DynamicObject, ObjectKey, OwnerReference, SecretRef};

// =============================================================================
// Watch events
// =============================================================================

/// Change notification emitted by an [`ObjectStore`].
///
/// Status writes do not emit events; only changes to metadata, spec or
/// object existence do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// An object was created or its metadata/spec changed.
    Applied { kind: String, key: ObjectKey },
    /// An object was removed from the store.
    Deleted { kind: String, key: ObjectKey },
}

impl WatchEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::Applied { kind, .. } | Self::Deleted { kind, .. } => kind,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::Applied { key, .. } | Self::Deleted { key, .. } => key,
        }
    }
}

// =============================================================================
// Secrets
// =============================================================================

/// A secret holding connection details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerReference>,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn new(target: &SecretRef, owner: Option<OwnerReference>) -> Self {
        Self {
            name: target.name.clone(),
            namespace: target.namespace.clone(),
            owner,
            resource_version: 0,
            data: BTreeMap::new(),
        }
    }

    pub fn reference(&self) -> SecretRef {
        SecretRef {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

// =============================================================================
// Store traits
// =============================================================================

/// Store for managed resource objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get an object by kind and key.
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<DynamicObject>;

    /// List all objects of a kind.
    async fn list(&self, kind: &str) -> Result<Vec<DynamicObject>>;

    /// Create a new object.
    async fn create(&self, object: DynamicObject) -> Result<DynamicObject>;

    /// Update metadata and spec. The status in `object` is ignored.
    ///
    /// Fails with `VersionMismatch` if `object.metadata.resource_version`
    /// is stale.
    async fn update(&self, object: DynamicObject) -> Result<DynamicObject>;

    /// Update the status subresource only.
    async fn update_status(&self, object: DynamicObject) -> Result<DynamicObject>;

    /// Request deletion. Objects with finalizers are marked with a deletion
    /// timestamp and removed once their last finalizer is gone.
    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<()>;

    /// Subscribe to change notifications.
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Store for connection secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, target: &SecretRef) -> Result<Secret>;

    /// Create a secret, failing with `AlreadyExists` if present.
    async fn create_secret(&self, secret: Secret) -> Result<Secret>;

    /// Replace an existing secret.
    async fn update_secret(&self, secret: Secret) -> Result<Secret>;
}
