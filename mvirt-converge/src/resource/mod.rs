//! Managed resource data model.
//!
//! Storage holds untyped [`DynamicObject`]s. The engine works on the typed
//! [`ManagedResource`] view of one kind; converting between the two is the
//! only place the engine checks which kind it was handed.

pub mod condition;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use condition::{Condition, ConditionSet, ConditionStatus, ConditionType, Reason};

/// Annotation holding the identifier the provider knows the resource by.
pub const EXTERNAL_NAME_ANNOTATION: &str = "converge.mvirt.io/external-name";

/// Stable name/namespace key of a managed resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Key for a cluster-scoped object.
    pub fn cluster(name: &str) -> Self {
        Self::new(None, name)
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Object metadata, modelled on the Kubernetes fields the engine uses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// The external name of a resource, if one has been recorded.
pub fn external_name(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations
        .get(EXTERNAL_NAME_ANNOTATION)
        .map(String::as_str)
        .filter(|name| !name.is_empty())
}

pub fn set_external_name(meta: &mut ObjectMeta, name: impl Into<String>) {
    meta.annotations
        .insert(EXTERNAL_NAME_ANNOTATION.to_string(), name.into());
}

/// Whether the external resource is deleted along with its managed resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Orphan,
}

/// Reference to the secret that receives connection details.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    pub namespace: String,
}

/// Reference to the object that controls a secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// Desired state shared by all managed resources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec<P> {
    pub for_provider: P,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretRef>,
}

impl<P> ResourceSpec<P> {
    pub fn new(for_provider: P) -> Self {
        Self {
            for_provider,
            deletion_policy: DeletionPolicy::Delete,
            provider_config_ref: None,
            write_connection_secret_to_ref: None,
        }
    }
}

/// Observed state shared by all managed resources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus<O> {
    #[serde(default)]
    pub conditions: ConditionSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_provider: Option<O>,
}

impl<O> Default for ResourceStatus<O> {
    fn default() -> Self {
        Self {
            conditions: ConditionSet::default(),
            at_provider: None,
        }
    }
}

impl<O: PartialEq> ResourceStatus<O> {
    pub fn set_condition(&mut self, condition: Condition) {
        self.conditions.set(condition);
    }

    /// Equal apart from condition transition times.
    pub fn equivalent(&self, other: &ResourceStatus<O>) -> bool {
        self.at_provider == other.at_provider && self.conditions.equivalent(&other.conditions)
    }
}

/// Untyped object as held by storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: serde_json::Value,
}

impl DynamicObject {
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

/// Typed view of a managed resource.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedResource<P, O> {
    pub metadata: ObjectMeta,
    pub spec: ResourceSpec<P>,
    pub status: ResourceStatus<O>,
}

impl<P, O> ManagedResource<P, O>
where
    P: Serialize + DeserializeOwned,
    O: Serialize + DeserializeOwned,
{
    pub fn new(metadata: ObjectMeta, spec: ResourceSpec<P>) -> Self {
        Self {
            metadata,
            spec,
            status: ResourceStatus::default(),
        }
    }

    /// Decode a stored object. A null status decodes as an empty status.
    pub fn from_dynamic(object: DynamicObject) -> Result<Self, serde_json::Error> {
        let spec = serde_json::from_value(object.spec)?;
        let status = if object.status.is_null() {
            ResourceStatus::default()
        } else {
            serde_json::from_value(object.status)?
        };
        Ok(Self {
            metadata: object.metadata,
            spec,
            status,
        })
    }

    pub fn to_dynamic(&self, kind: &str) -> Result<DynamicObject, serde_json::Error> {
        Ok(DynamicObject {
            kind: kind.to_string(),
            metadata: self.metadata.clone(),
            spec: serde_json::to_value(&self.spec)?,
            status: serde_json::to_value(&self.status)?,
        })
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn owner_reference(&self, kind: &str) -> OwnerReference {
        OwnerReference {
            kind: kind.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
        }
    }
}
