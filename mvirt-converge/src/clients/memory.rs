//! Emulated cloud provider.
//!
//! `MemoryCloud` keeps external resources of one kind in memory and answers
//! Get/Create/Update/Delete the way a cloud API does: 404 for missing
//! resources, 409 for duplicate creates, and an in-progress provisioning
//! state for a configurable number of reads after each write. Faults can be
//! queued per operation to exercise the engine's failure handling.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AuthError;
use crate::external::{ClientFactory, Credentials, ExternalClient, ResourceKind};

/// Credential key the emulated cloud requires.
pub const SUBSCRIPTION_ID: &str = "subscription_id";

/// Error returned by the emulated cloud API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} ({status}): {message}")]
pub struct CloudError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl CloudError {
    pub fn new(status: u16, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(id: &str) -> Self {
        Self::new(404, "ResourceNotFound", format!("resource {} was not found", id))
    }

    pub fn conflict(id: &str) -> Self {
        Self::new(409, "Conflict", format!("resource {} already exists", id))
    }

    pub fn unavailable() -> Self {
        Self::new(503, "ServiceUnavailable", "the service is temporarily unavailable")
    }

    pub fn throttled() -> Self {
        Self::new(429, "TooManyRequests", "request rate exceeded")
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// API operations, for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Update,
    Delete,
}

/// Provisioning phase the emulated cloud stamps onto an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningPhase {
    Creating,
    Updating,
    Succeeded,
}

/// How the emulated cloud builds and annotates resources of a kind.
pub trait Emulated: ResourceKind {
    /// Identifier the provider assigns to a resource created under `name`.
    fn resource_id(_subscription: &str, name: &str, _desired: &Self::Parameters) -> String {
        name.to_string()
    }

    /// Live state after applying `desired`, on top of `current` for updates.
    fn materialize(
        id: &str,
        name: &str,
        desired: &Self::Parameters,
        current: Option<&Self::Observation>,
    ) -> Self::Observation;

    /// Stamp the provider-reported provisioning state.
    fn set_phase(_observed: &mut Self::Observation, _phase: ProvisioningPhase) {}
}

struct Entry<O> {
    name: String,
    observed: O,
    /// Reads left before a pending write settles. `None` once settled.
    pending_polls: Option<usize>,
}

struct CloudState<O> {
    resources: BTreeMap<String, Entry<O>>,
    faults: HashMap<Op, VecDeque<CloudError>>,
    calls: HashMap<Op, usize>,
}

/// In-memory cloud for resources of kind `K`.
pub struct MemoryCloud<K: Emulated> {
    state: Arc<Mutex<CloudState<K::Observation>>>,
    provisioning_polls: usize,
}

impl<K: Emulated> Clone for MemoryCloud<K> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            provisioning_polls: self.provisioning_polls,
        }
    }
}

impl<K: Emulated> Default for MemoryCloud<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Emulated> MemoryCloud<K> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CloudState {
                resources: BTreeMap::new(),
                faults: HashMap::new(),
                calls: HashMap::new(),
            })),
            provisioning_polls: 0,
        }
    }

    /// Report writes as in progress for `polls` subsequent reads.
    pub fn with_provisioning_polls(mut self, polls: usize) -> Self {
        self.provisioning_polls = polls;
        self
    }

    /// Fail the next `times` calls of `op` with `error`.
    pub async fn fail_next(&self, op: Op, times: usize, error: CloudError) {
        let mut state = self.state.lock().await;
        let queue = state.faults.entry(op).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Number of calls of `op` so far, including failed ones.
    pub async fn calls(&self, op: Op) -> usize {
        let state = self.state.lock().await;
        state.calls.get(&op).copied().unwrap_or(0)
    }

    /// Current live state of `id`, without counting as an API call.
    pub async fn observed(&self, id: &str) -> Option<K::Observation> {
        let state = self.state.lock().await;
        state.resources.get(id).map(|e| e.observed.clone())
    }

    /// Seed a resource that exists outside the engine's control.
    pub async fn insert(&self, id: &str, observed: K::Observation) {
        let mut state = self.state.lock().await;
        state.resources.insert(
            id.to_string(),
            Entry {
                name: id.to_string(),
                observed,
                pending_polls: None,
            },
        );
    }

    /// Change a resource behind the engine's back. Returns false if absent.
    pub async fn modify(&self, id: &str, f: impl FnOnce(&mut K::Observation)) -> bool {
        let mut state = self.state.lock().await;
        match state.resources.get_mut(id) {
            Some(entry) => {
                f(&mut entry.observed);
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.resources.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn begin(state: &mut CloudState<K::Observation>, op: Op) -> Result<(), CloudError> {
        *state.calls.entry(op).or_insert(0) += 1;
        match state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => {
                debug!("Injecting {:?} failure: {}", op, err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Resolve an identifier, falling back to the name a resource was
    /// created under.
    fn lookup(state: &CloudState<K::Observation>, id: &str) -> Option<String> {
        if state.resources.contains_key(id) {
            return Some(id.to_string());
        }
        state
            .resources
            .iter()
            .find(|(_, entry)| entry.name == id)
            .map(|(key, _)| key.clone())
    }

    async fn get(&self, id: &str) -> Result<K::Observation, CloudError> {
        let mut state = self.state.lock().await;
        Self::begin(&mut state, Op::Get)?;
        let key = Self::lookup(&state, id).ok_or_else(|| CloudError::not_found(id))?;
        let Some(entry) = state.resources.get_mut(&key) else {
            return Err(CloudError::not_found(id));
        };

        match entry.pending_polls {
            Some(0) => {
                K::set_phase(&mut entry.observed, ProvisioningPhase::Succeeded);
                entry.pending_polls = None;
            }
            Some(n) => entry.pending_polls = Some(n - 1),
            None => {}
        }
        Ok(entry.observed.clone())
    }

    async fn create(
        &self,
        subscription: &str,
        name: &str,
        desired: &K::Parameters,
    ) -> Result<K::Observation, CloudError> {
        let mut state = self.state.lock().await;
        Self::begin(&mut state, Op::Create)?;
        let id = K::resource_id(subscription, name, desired);
        if state.resources.contains_key(&id) {
            return Err(CloudError::conflict(&id));
        }

        let mut observed = K::materialize(&id, name, desired, None);
        let phase = if self.provisioning_polls > 0 {
            ProvisioningPhase::Creating
        } else {
            ProvisioningPhase::Succeeded
        };
        K::set_phase(&mut observed, phase);
        debug!("Created {} {} ({:?})", K::KIND, id, phase);
        state.resources.insert(
            id,
            Entry {
                name: name.to_string(),
                observed: observed.clone(),
                pending_polls: (self.provisioning_polls > 0).then_some(self.provisioning_polls),
            },
        );
        Ok(observed)
    }

    async fn update(
        &self,
        id: &str,
        desired: &K::Parameters,
    ) -> Result<K::Observation, CloudError> {
        let mut state = self.state.lock().await;
        Self::begin(&mut state, Op::Update)?;
        let key = Self::lookup(&state, id).ok_or_else(|| CloudError::not_found(id))?;
        let polls = self.provisioning_polls;
        let Some(entry) = state.resources.get_mut(&key) else {
            return Err(CloudError::not_found(id));
        };

        let mut observed = K::materialize(&key, &entry.name, desired, Some(&entry.observed));
        let phase = if polls > 0 {
            ProvisioningPhase::Updating
        } else {
            ProvisioningPhase::Succeeded
        };
        K::set_phase(&mut observed, phase);
        debug!("Updated {} {} ({:?})", K::KIND, key, phase);
        entry.observed = observed.clone();
        entry.pending_polls = (polls > 0).then_some(polls);
        Ok(observed)
    }

    async fn delete(&self, id: &str) -> Result<(), CloudError> {
        let mut state = self.state.lock().await;
        Self::begin(&mut state, Op::Delete)?;
        let key = Self::lookup(&state, id).ok_or_else(|| CloudError::not_found(id))?;
        state.resources.remove(&key);
        debug!("Deleted {} {}", K::KIND, key);
        Ok(())
    }
}

/// Client for one subscription of a [`MemoryCloud`].
pub struct MemoryClient<K: Emulated> {
    cloud: MemoryCloud<K>,
    subscription: String,
}

#[async_trait]
impl<K: Emulated> ExternalClient<K> for MemoryClient<K> {
    type Error = CloudError;

    async fn get(&self, id: &str) -> Result<K::Observation, CloudError> {
        self.cloud.get(id).await
    }

    async fn create(&self, id: &str, desired: &K::Parameters) -> Result<K::Observation, CloudError> {
        self.cloud.create(&self.subscription, id, desired).await
    }

    async fn update(&self, id: &str, desired: &K::Parameters) -> Result<K::Observation, CloudError> {
        self.cloud.update(id, desired).await
    }

    async fn delete(&self, id: &str) -> Result<(), CloudError> {
        self.cloud.delete(id).await
    }

    fn is_not_found(&self, err: &CloudError) -> bool {
        err.is_not_found()
    }
}

impl<K: Emulated> ClientFactory<K> for MemoryCloud<K> {
    type Client = MemoryClient<K>;

    fn build(&self, credentials: &Credentials) -> Result<MemoryClient<K>, AuthError> {
        let subscription = credentials
            .get(SUBSCRIPTION_ID)
            .ok_or_else(|| AuthError::MissingKey(SUBSCRIPTION_ID.to_string()))?;
        if subscription.trim().is_empty() {
            return Err(AuthError::Invalid(format!("{} is empty", SUBSCRIPTION_ID)));
        }
        Ok(MemoryClient {
            cloud: self.clone(),
            subscription: subscription.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{ErrorTags, ProvisioningState};
    use serde::{Deserialize, Serialize};

    struct Disk;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct DiskParams {
        size_gb: u64,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct DiskObservation {
        id: String,
        size_gb: u64,
        state: String,
    }

    impl ResourceKind for Disk {
        type Parameters = DiskParams;
        type Observation = DiskObservation;

        const KIND: &'static str = "Disk";
        const TAGS: ErrorTags = ErrorTags {
            observe: "cannot get disk",
            create: "cannot create disk",
            update: "cannot update disk",
            delete: "cannot delete disk",
            connect: "cannot connect to disk provider",
            not_kind: "managed resource is not a Disk",
        };

        fn is_up_to_date(desired: &DiskParams, observed: &DiskObservation) -> bool {
            desired.size_gb == observed.size_gb
        }

        fn provisioning_state(observed: &DiskObservation) -> ProvisioningState {
            match observed.state.as_str() {
                "Succeeded" => ProvisioningState::Succeeded,
                other => ProvisioningState::InProgress(other.to_string()),
            }
        }
    }

    impl Emulated for Disk {
        fn resource_id(subscription: &str, name: &str, _: &DiskParams) -> String {
            format!("/subscriptions/{}/disks/{}", subscription, name)
        }

        fn materialize(
            id: &str,
            _name: &str,
            desired: &DiskParams,
            _current: Option<&DiskObservation>,
        ) -> DiskObservation {
            DiskObservation {
                id: id.to_string(),
                size_gb: desired.size_gb,
                state: String::new(),
            }
        }

        fn set_phase(observed: &mut DiskObservation, phase: ProvisioningPhase) {
            observed.state = format!("{:?}", phase);
        }
    }

    fn client(cloud: &MemoryCloud<Disk>) -> MemoryClient<Disk> {
        cloud
            .build(&Credentials::new().with(SUBSCRIPTION_ID, "sub-1"))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_provider_id() {
        let cloud = MemoryCloud::<Disk>::new();
        let client = client(&cloud);

        let created = client.create("d1", &DiskParams { size_gb: 10 }).await.unwrap();
        assert_eq!(created.id, "/subscriptions/sub-1/disks/d1");
        assert_eq!(created.state, "Succeeded");

        // Reachable by id and by the name it was created under.
        assert!(client.get(&created.id).await.is_ok());
        assert!(client.get("d1").await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_and_duplicate_resources() {
        let cloud = MemoryCloud::<Disk>::new();
        let client = client(&cloud);

        let err = client.get("nope").await.unwrap_err();
        assert!(client.is_not_found(&err));
        let err = client.delete("nope").await.unwrap_err();
        assert_eq!(err.status, 404);

        client.create("d1", &DiskParams { size_gb: 10 }).await.unwrap();
        let err = client.create("d1", &DiskParams { size_gb: 10 }).await.unwrap_err();
        assert_eq!(err.status, 409);
        assert!(!client.is_not_found(&err));
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed_in_order() {
        let cloud = MemoryCloud::<Disk>::new();
        let client = client(&cloud);
        cloud.fail_next(Op::Get, 2, CloudError::unavailable()).await;

        assert_eq!(client.get("d1").await.unwrap_err().status, 503);
        assert_eq!(client.get("d1").await.unwrap_err().status, 503);
        assert_eq!(client.get("d1").await.unwrap_err().status, 404);
        assert_eq!(cloud.calls(Op::Get).await, 3);
        assert_eq!(cloud.calls(Op::Create).await, 0);
    }

    #[tokio::test]
    async fn test_provisioning_delay() {
        let cloud = MemoryCloud::<Disk>::new().with_provisioning_polls(2);
        let client = client(&cloud);

        let created = client.create("d1", &DiskParams { size_gb: 10 }).await.unwrap();
        assert_eq!(created.state, "Creating");
        assert_eq!(client.get("d1").await.unwrap().state, "Creating");
        assert_eq!(client.get("d1").await.unwrap().state, "Creating");
        assert_eq!(client.get("d1").await.unwrap().state, "Succeeded");

        let updated = client.update("d1", &DiskParams { size_gb: 20 }).await.unwrap();
        assert_eq!(updated.state, "Updating");
        assert_eq!(updated.size_gb, 20);
    }

    #[test]
    fn test_factory_requires_subscription() {
        let cloud = MemoryCloud::<Disk>::new();
        let err = cloud.build(&Credentials::new()).err().unwrap();
        assert!(matches!(err, AuthError::MissingKey(key) if key == SUBSCRIPTION_ID));

        let err = cloud
            .build(&Credentials::new().with(SUBSCRIPTION_ID, " "))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "invalid credentials: subscription_id is empty");
    }
}
