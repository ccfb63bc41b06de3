//! Seams between the engine and the outside world.
//!
//! - [`ResourceKind`]: static, per-kind behaviour (comparison, late
//!   initialization, provisioning state, connection details).
//! - [`ExternalClient`]: Get/Create/Update/Delete against the provider for
//!   one kind, plus the provider's "not found" classification.
//! - [`Connector`]: builds a client for a managed resource, usually by
//!   resolving credentials through a [`CredentialResolver`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{AuthError, ReconcileError};
use crate::resource::{ManagedResource, ObjectKey};
use crate::secret::ConnectionDetails;

/// Provider config used when a resource names none.
pub const DEFAULT_PROVIDER_CONFIG: &str = "default";

/// Static descriptions attached to errors of one kind.
#[derive(Debug, Clone, Copy)]
pub struct ErrorTags {
    pub observe: &'static str,
    pub create: &'static str,
    pub update: &'static str,
    pub delete: &'static str,
    pub connect: &'static str,
    pub not_kind: &'static str,
}

/// Provider-reported provisioning state of an external resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    Succeeded,
    InProgress(String),
    Failed(String),
}

/// Typed view of a managed resource of kind `K`.
pub type Managed<K> =
    ManagedResource<<K as ResourceKind>::Parameters, <K as ResourceKind>::Observation>;

/// Per-kind behaviour of a managed resource.
///
/// Everything here is a pure function of desired parameters and observed
/// state; the engine never branches on the concrete kind.
pub trait ResourceKind: Send + Sync + 'static {
    /// Desired parameters (`spec.forProvider`).
    type Parameters: Clone
        + Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;
    /// Provider snapshot (`status.atProvider`).
    type Observation: Clone
        + Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    const KIND: &'static str;
    const TAGS: ErrorTags;

    /// Whether the live resource matches the desired parameters.
    fn is_up_to_date(desired: &Self::Parameters, observed: &Self::Observation) -> bool;

    /// Back-fill unset parameters from the live resource. Returns whether
    /// anything changed. Must never overwrite a parameter that is set.
    fn late_initialize(_desired: &mut Self::Parameters, _observed: &Self::Observation) -> bool {
        false
    }

    fn provisioning_state(_observed: &Self::Observation) -> ProvisioningState {
        ProvisioningState::Succeeded
    }

    fn connection_details(
        _desired: &Self::Parameters,
        _observed: &Self::Observation,
    ) -> ConnectionDetails {
        ConnectionDetails::new()
    }

    /// Identifier assigned by the provider, if it differs from the name the
    /// resource was created under.
    fn external_id(_observed: &Self::Observation) -> Option<String> {
        None
    }
}

/// Client for one kind of external resource.
#[async_trait]
pub trait ExternalClient<K: ResourceKind>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get(&self, id: &str) -> Result<K::Observation, Self::Error>;

    async fn create(&self, id: &str, desired: &K::Parameters) -> Result<K::Observation, Self::Error>;

    async fn update(&self, id: &str, desired: &K::Parameters) -> Result<K::Observation, Self::Error>;

    async fn delete(&self, id: &str) -> Result<(), Self::Error>;

    /// Whether an error means the external resource does not exist.
    fn is_not_found(&self, err: &Self::Error) -> bool;
}

/// Builds a client for a specific managed resource.
#[async_trait]
pub trait Connector<K: ResourceKind>: Send + Sync {
    type Client: ExternalClient<K>;

    async fn connect(&self, managed: &Managed<K>) -> Result<Self::Client, ReconcileError>;
}

/// Opaque credential set handed to client factories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// Resolves the credentials a managed resource should use.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(
        &self,
        key: &ObjectKey,
        provider_config: &str,
    ) -> Result<Credentials, AuthError>;
}

/// Credential sets keyed by provider config name.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    configs: BTreeMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, name: &str, credentials: Credentials) -> Self {
        self.configs.insert(name.to_string(), credentials);
        self
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(
        &self,
        key: &ObjectKey,
        provider_config: &str,
    ) -> Result<Credentials, AuthError> {
        debug!("Resolving provider config {} for {}", provider_config, key);
        self.configs
            .get(provider_config)
            .cloned()
            .ok_or_else(|| AuthError::MissingProviderConfig(provider_config.to_string()))
    }
}

/// Builds a kind's client from resolved credentials.
pub trait ClientFactory<K: ResourceKind>: Send + Sync {
    type Client: ExternalClient<K>;

    fn build(&self, credentials: &Credentials) -> Result<Self::Client, AuthError>;
}

/// Connector that resolves credentials and hands them to a factory.
pub struct CredentialConnector<K, R, F> {
    resolver: R,
    factory: F,
    _kind: PhantomData<fn() -> K>,
}

impl<K, R, F> CredentialConnector<K, R, F> {
    pub fn new(resolver: R, factory: F) -> Self {
        Self {
            resolver,
            factory,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K, R, F> Connector<K> for CredentialConnector<K, R, F>
where
    K: ResourceKind,
    R: CredentialResolver,
    F: ClientFactory<K>,
{
    type Client = F::Client;

    async fn connect(&self, managed: &Managed<K>) -> Result<Self::Client, ReconcileError> {
        let config = managed
            .spec
            .provider_config_ref
            .as_deref()
            .unwrap_or(DEFAULT_PROVIDER_CONFIG);
        let credentials = self
            .resolver
            .resolve(&managed.key(), config)
            .await
            .map_err(|e| ReconcileError::auth(K::TAGS.connect, e))?;
        self.factory
            .build(&credentials)
            .map_err(|e| ReconcileError::auth(K::TAGS.connect, e))
    }
}
