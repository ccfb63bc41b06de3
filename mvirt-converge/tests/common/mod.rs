//! Shared test utilities for mvirt-converge integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use mvirt_converge::clients::{Emulated, MemoryCloud, SUBSCRIPTION_ID};
use mvirt_converge::kinds::{
    DatabaseServerParameters, StorageAccountParameters, VirtualNetworkRuleParameters,
};
use mvirt_converge::resource::{
    Condition, ConditionType, DynamicObject, ManagedResource, ObjectKey, ObjectMeta, ResourceSpec,
    SecretRef,
};
use mvirt_converge::store::{MemorySecretStore, MemoryStore, ObjectStore, StoreError};
use mvirt_converge::{
    Action, CredentialConnector, Credentials, EngineConfig, Managed, ReconcileError, Reconciler,
    ResourceKind, StaticCredentials,
};

pub const NAMESPACE: &str = "default";
pub const SUBSCRIPTION: &str = "sub-1";

pub type TestConnector<K> = CredentialConnector<K, StaticCredentials, MemoryCloud<K>>;

pub fn key(name: &str) -> ObjectKey {
    ObjectKey::new(Some(NAMESPACE), name)
}

/// Engine settings with short intervals.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_secs(60),
        wait_interval: Duration::from_secs(15),
        error_backoff_base: Duration::from_millis(10),
        max_backoff: Duration::from_millis(100),
        reconcile_timeout: Duration::from_secs(5),
        concurrency: 4,
    }
}

/// Resolver with a `default` provider config for the test subscription.
pub fn credentials() -> StaticCredentials {
    StaticCredentials::new().with_config(
        "default",
        Credentials::new().with(SUBSCRIPTION_ID, SUBSCRIPTION),
    )
}

pub fn secret_ref(name: &str) -> SecretRef {
    SecretRef {
        name: name.to_string(),
        namespace: NAMESPACE.to_string(),
    }
}

pub fn db_params(tier: &str) -> DatabaseServerParameters {
    DatabaseServerParameters {
        region: "eastus".to_string(),
        tier: tier.to_string(),
        version: None,
        storage_gb: None,
        backup_retention_days: None,
        ssl_enforcement: None,
        administrator_login: "admin".to_string(),
        tags: BTreeMap::new(),
    }
}

pub fn storage_params(sku: &str) -> StorageAccountParameters {
    StorageAccountParameters {
        region: "eastus".to_string(),
        sku: sku.to_string(),
        kind: None,
        access_tier: None,
        https_only: None,
        tags: BTreeMap::new(),
    }
}

pub fn rule_params(subnet: &str) -> VirtualNetworkRuleParameters {
    VirtualNetworkRuleParameters {
        server: "srv1".to_string(),
        subnet_id: format!("/subscriptions/{}/subnets/{}", SUBSCRIPTION, subnet),
        ignore_missing_endpoint: None,
    }
}

/// A new managed resource in the test namespace.
pub fn managed<K: ResourceKind>(name: &str, params: K::Parameters) -> Managed<K> {
    Managed::<K>::new(
        ObjectMeta::new(Some(NAMESPACE), name),
        ResourceSpec::new(params),
    )
}

pub fn condition<P, O>(managed: &ManagedResource<P, O>, type_: ConditionType) -> Condition
where
    P: Serialize + DeserializeOwned,
    O: Serialize + DeserializeOwned,
{
    managed
        .status
        .conditions
        .get(type_)
        .cloned()
        .unwrap_or_else(|| panic!("no {} condition on {}", type_, managed.key()))
}

/// Store, secret store, emulated cloud and reconciler for one kind.
pub struct TestEnv<K: Emulated> {
    pub store: Arc<MemoryStore>,
    pub secrets: Arc<MemorySecretStore>,
    pub cloud: MemoryCloud<K>,
    pub reconciler: Arc<Reconciler<K, TestConnector<K>>>,
}

impl<K: Emulated> TestEnv<K> {
    pub fn new() -> Self {
        Self::with_cloud(MemoryCloud::new())
    }

    pub fn with_cloud(cloud: MemoryCloud<K>) -> Self {
        Self::build(cloud, credentials(), test_config())
    }

    pub fn build(cloud: MemoryCloud<K>, resolver: StaticCredentials, config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let secrets = Arc::new(MemorySecretStore::new());
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            secrets.clone(),
            CredentialConnector::new(resolver, cloud.clone()),
            config,
        ));
        Self {
            store,
            secrets,
            cloud,
            reconciler,
        }
    }

    /// Store a new managed resource.
    pub async fn apply(&self, managed: Managed<K>) -> DynamicObject {
        let object = managed
            .to_dynamic(K::KIND)
            .expect("Failed to encode managed resource");
        self.store
            .create(object)
            .await
            .expect("Failed to create managed resource")
    }

    pub async fn reconcile(&self, name: &str) -> Result<Action, ReconcileError> {
        self.reconciler.reconcile(&key(name)).await
    }

    pub async fn try_get(&self, name: &str) -> Option<Managed<K>> {
        match self.store.get(K::KIND, &key(name)).await {
            Ok(object) => Some(Managed::<K>::from_dynamic(object).expect("Failed to decode")),
            Err(e) if e.is_not_found() => None,
            Err(e) => panic!("Failed to get {}: {}", name, e),
        }
    }

    pub async fn get(&self, name: &str) -> Managed<K> {
        self.try_get(name)
            .await
            .unwrap_or_else(|| panic!("{} not found", name))
    }

    /// Edit the stored spec or metadata, the way a user would. Retries when a
    /// running controller wins the race for the object.
    pub async fn edit(&self, name: &str, mut f: impl FnMut(&mut Managed<K>)) {
        for _ in 0..50 {
            let mut managed = self.get(name).await;
            f(&mut managed);
            match self
                .store
                .update(managed.to_dynamic(K::KIND).expect("Failed to encode"))
                .await
            {
                Ok(_) => return,
                Err(StoreError::VersionMismatch { .. }) => {
                    tokio::time::sleep(Duration::from_millis(5)).await
                }
                Err(e) => panic!("Failed to update {}: {}", name, e),
            }
        }
        panic!("Gave up editing {}", name);
    }

    pub async fn request_delete(&self, name: &str) {
        self.store
            .delete(K::KIND, &key(name))
            .await
            .expect("Failed to delete managed resource");
    }

    /// Poll until `check` holds for the stored object, or panic.
    pub async fn wait_for(&self, name: &str, mut check: impl FnMut(Option<&Managed<K>>) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let current = self.try_get(name).await;
            if check(current.as_ref()) {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("Timed out waiting for {}: {:?}", name, current);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
