//! Connection secret publishing.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::resource::{OwnerReference, SecretRef};
use crate::store::{Secret, SecretStore, StoreError};

pub const CONNECTION_USERNAME: &str = "username";
pub const CONNECTION_PASSWORD: &str = "password";
pub const CONNECTION_ENDPOINT: &str = "endpoint";
pub const CONNECTION_PORT: &str = "port";

/// Connection details derived from an external resource.
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

/// Writes connection details into the secret a managed resource names.
#[derive(Clone)]
pub struct ConnectionPublisher {
    secrets: Arc<dyn SecretStore>,
}

impl ConnectionPublisher {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }

    /// Create the secret, or merge the details into the existing one.
    ///
    /// Keys present in `details` overwrite the stored values; other keys are
    /// left alone. Returns whether anything was written. Fails with
    /// `Conflict` if the secret is controlled by another object.
    pub async fn publish(
        &self,
        owner: &OwnerReference,
        target: &SecretRef,
        details: &ConnectionDetails,
    ) -> Result<bool, StoreError> {
        let mut secret = Secret::new(target, Some(owner.clone()));
        secret.data = details.clone();

        match self.secrets.create_secret(secret).await {
            Ok(_) => {
                info!(
                    "Created connection secret {}/{} for {}",
                    target.namespace, target.name, owner.name
                );
                return Ok(true);
            }
            Err(StoreError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }

        let mut existing = self.secrets.get_secret(target).await?;
        if let Some(current) = &existing.owner {
            if current.uid != owner.uid {
                return Err(StoreError::Conflict(format!(
                    "secret {}/{} is controlled by {} {}",
                    target.namespace, target.name, current.kind, current.name
                )));
            }
        }

        let mut merged = existing.data.clone();
        merged.extend(details.iter().map(|(k, v)| (k.clone(), v.clone())));
        if merged == existing.data && existing.owner.is_some() {
            debug!(
                "Connection secret {}/{} already up to date",
                target.namespace, target.name
            );
            return Ok(false);
        }

        existing.data = merged;
        existing.owner = Some(owner.clone());
        self.secrets.update_secret(existing).await?;
        info!(
            "Updated connection secret {}/{} for {}",
            target.namespace, target.name, owner.name
        );
        Ok(true)
    }
}
