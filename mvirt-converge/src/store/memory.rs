//! In-memory stores.
//!
//! `MemoryStore` reproduces the API server behaviour the engine depends on:
//! optimistic concurrency on `resource_version`, a separate status
//! subresource, and finalizer-gated deletion.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use super::error::{Result, StoreError};
use super::traits::{ObjectStore, Secret, SecretStore, WatchEvent};
use crate::resource::{DynamicObject, ObjectKey, SecretRef};

const WATCH_CAPACITY: usize = 256;

type StoreKey = (String, ObjectKey);

/// In-memory object store.
pub struct MemoryStore {
    objects: RwLock<BTreeMap<StoreKey, DynamicObject>>,
    events: broadcast::Sender<WatchEvent>,
    failing_status_writes: AtomicUsize,
    failing_updates: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            events,
            failing_status_writes: AtomicUsize::new(0),
            failing_updates: AtomicUsize::new(0),
        }
    }

    /// Fail the next `times` status writes with an internal error.
    pub fn fail_status_writes(&self, times: usize) {
        self.failing_status_writes.store(times, Ordering::SeqCst);
    }

    /// Fail the next `times` metadata/spec updates with an internal error.
    pub fn fail_updates(&self, times: usize) {
        self.failing_updates.store(times, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn emit(&self, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn check_version(stored: &DynamicObject, incoming: &DynamicObject) -> Result<()> {
        if stored.metadata.resource_version != incoming.metadata.resource_version {
            return Err(StoreError::VersionMismatch {
                expected: stored.metadata.resource_version,
                actual: incoming.metadata.resource_version,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<DynamicObject> {
        let objects = self.objects.read().await;
        objects
            .get(&(kind.to_string(), key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", kind, key)))
    }

    async fn list(&self, kind: &str) -> Result<Vec<DynamicObject>> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|((k, _), _)| k == kind)
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, mut object: DynamicObject) -> Result<DynamicObject> {
        let key = (object.kind.clone(), object.key());
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!("{} {}", key.0, key.1)));
        }

        object.metadata.uid = uuid::Uuid::new_v4().to_string();
        object.metadata.resource_version = 1;
        object.metadata.generation = 1;
        object.metadata.creation_timestamp = Some(Utc::now());
        object.metadata.deletion_timestamp = None;
        objects.insert(key.clone(), object.clone());
        drop(objects);

        self.emit(WatchEvent::Applied {
            kind: key.0,
            key: key.1,
        });
        Ok(object)
    }

    async fn update(&self, object: DynamicObject) -> Result<DynamicObject> {
        if Self::take_failure(&self.failing_updates) {
            return Err(StoreError::Internal("injected update failure".to_string()));
        }

        let key = (object.kind.clone(), object.key());
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", key.0, key.1)))?;
        Self::check_version(stored, &object)?;

        let mut updated = stored.clone();
        if updated.spec != object.spec {
            updated.metadata.generation += 1;
        }
        updated.spec = object.spec;
        updated.metadata.finalizers = object.metadata.finalizers;
        updated.metadata.annotations = object.metadata.annotations;
        updated.metadata.resource_version += 1;

        if updated.metadata.is_deleting() && updated.metadata.finalizers.is_empty() {
            debug!("Last finalizer removed from {} {}, deleting", key.0, key.1);
            objects.remove(&key);
            drop(objects);
            self.emit(WatchEvent::Deleted {
                kind: key.0,
                key: key.1,
            });
            return Ok(updated);
        }

        objects.insert(key.clone(), updated.clone());
        drop(objects);
        self.emit(WatchEvent::Applied {
            kind: key.0,
            key: key.1,
        });
        Ok(updated)
    }

    async fn update_status(&self, object: DynamicObject) -> Result<DynamicObject> {
        if Self::take_failure(&self.failing_status_writes) {
            return Err(StoreError::Internal(
                "injected status write failure".to_string(),
            ));
        }

        let key = (object.kind.clone(), object.key());
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", key.0, key.1)))?;
        Self::check_version(stored, &object)?;

        stored.status = object.status;
        stored.metadata.resource_version += 1;
        Ok(stored.clone())
    }

    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<()> {
        let store_key = (kind.to_string(), key.clone());
        let mut objects = self.objects.write().await;
        let stored = objects
            .get_mut(&store_key)
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", kind, key)))?;

        if stored.metadata.finalizers.is_empty() {
            objects.remove(&store_key);
            drop(objects);
            self.emit(WatchEvent::Deleted {
                kind: kind.to_string(),
                key: key.clone(),
            });
            return Ok(());
        }

        if stored.metadata.deletion_timestamp.is_none() {
            stored.metadata.deletion_timestamp = Some(Utc::now());
            stored.metadata.resource_version += 1;
        }
        drop(objects);
        self.emit(WatchEvent::Applied {
            kind: kind.to_string(),
            key: key.clone(),
        });
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

/// In-memory secret store.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<BTreeMap<SecretRef, Secret>>,
    writes: AtomicUsize,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful creates and updates so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, target: &SecretRef) -> Result<Secret> {
        let secrets = self.secrets.read().await;
        secrets
            .get(target)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("secret {}/{}", target.namespace, target.name)))
    }

    async fn create_secret(&self, mut secret: Secret) -> Result<Secret> {
        let target = secret.reference();
        let mut secrets = self.secrets.write().await;
        if secrets.contains_key(&target) {
            return Err(StoreError::AlreadyExists(format!(
                "secret {}/{}",
                target.namespace, target.name
            )));
        }
        secret.resource_version = 1;
        secrets.insert(target, secret.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(secret)
    }

    async fn update_secret(&self, mut secret: Secret) -> Result<Secret> {
        let target = secret.reference();
        let mut secrets = self.secrets.write().await;
        let stored = secrets.get_mut(&target).ok_or_else(|| {
            StoreError::NotFound(format!("secret {}/{}", target.namespace, target.name))
        })?;
        if stored.resource_version != secret.resource_version {
            return Err(StoreError::VersionMismatch {
                expected: stored.resource_version,
                actual: secret.resource_version,
            });
        }
        secret.resource_version += 1;
        *stored = secret.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(secret)
    }
}
