//! Managed database server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clients::{Emulated, ProvisioningPhase};
use crate::external::{ErrorTags, ProvisioningState, ResourceKind};
use crate::pipeline::late_init;
use crate::secret::{CONNECTION_ENDPOINT, CONNECTION_PORT, CONNECTION_USERNAME, ConnectionDetails};

const DEFAULT_VERSION: &str = "11";
const DEFAULT_STORAGE_GB: u32 = 32;
const DEFAULT_BACKUP_RETENTION_DAYS: u32 = 7;
const DEFAULT_PORT: u16 = 5432;

pub struct DatabaseServer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseServerParameters {
    /// Immutable after creation.
    pub region: String,
    pub tier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_gb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_retention_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_enforcement: Option<bool>,
    pub administrator_login: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseServerObservation {
    pub id: String,
    pub name: String,
    pub region: String,
    pub tier: String,
    pub version: String,
    pub storage_gb: u32,
    pub backup_retention_days: u32,
    pub ssl_enforcement: bool,
    pub administrator_login: String,
    pub fqdn: String,
    pub port: u16,
    /// Ready, Creating, Updating or Failed.
    pub state: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl ResourceKind for DatabaseServer {
    type Parameters = DatabaseServerParameters;
    type Observation = DatabaseServerObservation;

    const KIND: &'static str = "DatabaseServer";
    const TAGS: ErrorTags = ErrorTags {
        observe: "cannot get database server",
        create: "cannot create database server",
        update: "cannot update database server",
        delete: "cannot delete database server",
        connect: "cannot connect to database server provider",
        not_kind: "managed resource is not a DatabaseServer",
    };

    fn is_up_to_date(desired: &Self::Parameters, observed: &Self::Observation) -> bool {
        desired.tier == observed.tier
            && desired.tags == observed.tags
            && desired.version.as_ref().is_none_or(|v| *v == observed.version)
            && desired.storage_gb.is_none_or(|v| v == observed.storage_gb)
            && desired
                .backup_retention_days
                .is_none_or(|v| v == observed.backup_retention_days)
            && desired
                .ssl_enforcement
                .is_none_or(|v| v == observed.ssl_enforcement)
    }

    fn late_initialize(desired: &mut Self::Parameters, observed: &Self::Observation) -> bool {
        // Non-short-circuiting: every field gets its chance.
        late_init(&mut desired.version, Some(&observed.version))
            | late_init(&mut desired.storage_gb, Some(&observed.storage_gb))
            | late_init(
                &mut desired.backup_retention_days,
                Some(&observed.backup_retention_days),
            )
            | late_init(&mut desired.ssl_enforcement, Some(&observed.ssl_enforcement))
    }

    fn provisioning_state(observed: &Self::Observation) -> ProvisioningState {
        match observed.state.as_str() {
            "Ready" => ProvisioningState::Succeeded,
            "Failed" => ProvisioningState::Failed(format!(
                "database server {} failed to provision",
                observed.name
            )),
            other => ProvisioningState::InProgress(format!("database server is {}", other)),
        }
    }

    fn connection_details(
        _desired: &Self::Parameters,
        observed: &Self::Observation,
    ) -> ConnectionDetails {
        let mut details = ConnectionDetails::new();
        details.insert(
            CONNECTION_USERNAME.to_string(),
            format!("{}@{}", observed.administrator_login, observed.name).into_bytes(),
        );
        details.insert(
            CONNECTION_ENDPOINT.to_string(),
            observed.fqdn.clone().into_bytes(),
        );
        details.insert(
            CONNECTION_PORT.to_string(),
            observed.port.to_string().into_bytes(),
        );
        details
    }
}

impl Emulated for DatabaseServer {
    fn materialize(
        id: &str,
        name: &str,
        desired: &Self::Parameters,
        current: Option<&Self::Observation>,
    ) -> Self::Observation {
        let region = current.map_or_else(|| desired.region.clone(), |c| c.region.clone());
        DatabaseServerObservation {
            id: id.to_string(),
            name: name.to_string(),
            fqdn: format!("{}.db.{}.cloud.mvirt.io", name, region),
            region,
            tier: desired.tier.clone(),
            version: desired
                .version
                .clone()
                .or_else(|| current.map(|c| c.version.clone()))
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            storage_gb: desired
                .storage_gb
                .or(current.map(|c| c.storage_gb))
                .unwrap_or(DEFAULT_STORAGE_GB),
            backup_retention_days: desired
                .backup_retention_days
                .or(current.map(|c| c.backup_retention_days))
                .unwrap_or(DEFAULT_BACKUP_RETENTION_DAYS),
            ssl_enforcement: desired
                .ssl_enforcement
                .or(current.map(|c| c.ssl_enforcement))
                .unwrap_or(true),
            administrator_login: desired.administrator_login.clone(),
            port: DEFAULT_PORT,
            state: "Ready".to_string(),
            tags: desired.tags.clone(),
        }
    }

    fn set_phase(observed: &mut Self::Observation, phase: ProvisioningPhase) {
        observed.state = match phase {
            ProvisioningPhase::Creating => "Creating",
            ProvisioningPhase::Updating => "Updating",
            ProvisioningPhase::Succeeded => "Ready",
        }
        .to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> DatabaseServerParameters {
        DatabaseServerParameters {
            region: "eastus".to_string(),
            tier: "Basic".to_string(),
            version: None,
            storage_gb: None,
            backup_retention_days: None,
            ssl_enforcement: None,
            administrator_login: "admin".to_string(),
            tags: BTreeMap::new(),
        }
    }

    fn live() -> DatabaseServerObservation {
        DatabaseServer::materialize("srv1", "srv1", &params(), None)
    }

    #[test]
    fn test_up_to_date_ignores_unset_fields() {
        assert!(DatabaseServer::is_up_to_date(&params(), &live()));

        let mut premium = params();
        premium.tier = "Premium".to_string();
        assert!(!DatabaseServer::is_up_to_date(&premium, &live()));

        let mut bigger = params();
        bigger.storage_gb = Some(64);
        assert!(!DatabaseServer::is_up_to_date(&bigger, &live()));
    }

    #[test]
    fn test_region_change_is_not_drift() {
        let mut moved = params();
        moved.region = "westus".to_string();
        assert!(DatabaseServer::is_up_to_date(&moved, &live()));

        let updated = DatabaseServer::materialize("srv1", "srv1", &moved, Some(&live()));
        assert_eq!(updated.region, "eastus");
    }

    #[test]
    fn test_late_initialize_fills_every_unset_field() {
        let mut desired = params();
        desired.storage_gb = Some(100);

        assert!(DatabaseServer::late_initialize(&mut desired, &live()));
        assert_eq!(desired.version.as_deref(), Some(DEFAULT_VERSION));
        assert_eq!(desired.storage_gb, Some(100));
        assert_eq!(desired.backup_retention_days, Some(DEFAULT_BACKUP_RETENTION_DAYS));
        assert_eq!(desired.ssl_enforcement, Some(true));

        assert!(!DatabaseServer::late_initialize(&mut desired, &live()));
    }

    #[test]
    fn test_provisioning_state_from_server_state() {
        let mut observed = live();
        assert_eq!(
            DatabaseServer::provisioning_state(&observed),
            ProvisioningState::Succeeded
        );

        DatabaseServer::set_phase(&mut observed, ProvisioningPhase::Creating);
        assert!(matches!(
            DatabaseServer::provisioning_state(&observed),
            ProvisioningState::InProgress(_)
        ));

        observed.state = "Failed".to_string();
        assert!(matches!(
            DatabaseServer::provisioning_state(&observed),
            ProvisioningState::Failed(_)
        ));
    }

    #[test]
    fn test_connection_details() {
        let details = DatabaseServer::connection_details(&params(), &live());
        assert_eq!(details[CONNECTION_USERNAME], b"admin@srv1".to_vec());
        assert_eq!(
            details[CONNECTION_ENDPOINT],
            b"srv1.db.eastus.cloud.mvirt.io".to_vec()
        );
        assert_eq!(details[CONNECTION_PORT], b"5432".to_vec());
    }
}
