//! Storage account.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clients::{Emulated, ProvisioningPhase};
use crate::external::{ErrorTags, ProvisioningState, ResourceKind};
use crate::pipeline::late_init;
use crate::secret::{CONNECTION_ENDPOINT, ConnectionDetails};

/// Connection secret key holding the account name.
pub const CONNECTION_ACCOUNT_NAME: &str = "accountName";

const DEFAULT_KIND: &str = "StorageV2";
const DEFAULT_ACCESS_TIER: &str = "Hot";

pub struct StorageAccount;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccountParameters {
    pub region: String,
    pub sku: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_only: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccountObservation {
    pub id: String,
    pub name: String,
    pub region: String,
    pub sku: String,
    pub kind: String,
    pub access_tier: String,
    pub https_only: bool,
    pub primary_endpoint: String,
    pub provisioning_state: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl ResourceKind for StorageAccount {
    type Parameters = StorageAccountParameters;
    type Observation = StorageAccountObservation;

    const KIND: &'static str = "StorageAccount";
    const TAGS: ErrorTags = ErrorTags {
        observe: "cannot get storage account",
        create: "cannot create storage account",
        update: "cannot update storage account",
        delete: "cannot delete storage account",
        connect: "cannot connect to storage account provider",
        not_kind: "managed resource is not a StorageAccount",
    };

    fn is_up_to_date(desired: &Self::Parameters, observed: &Self::Observation) -> bool {
        desired.sku == observed.sku
            && desired.tags == observed.tags
            && desired.kind.as_ref().is_none_or(|k| *k == observed.kind)
            && desired
                .access_tier
                .as_ref()
                .is_none_or(|t| *t == observed.access_tier)
            && desired.https_only.is_none_or(|h| h == observed.https_only)
    }

    fn late_initialize(desired: &mut Self::Parameters, observed: &Self::Observation) -> bool {
        late_init(&mut desired.kind, Some(&observed.kind))
            | late_init(&mut desired.access_tier, Some(&observed.access_tier))
            | late_init(&mut desired.https_only, Some(&observed.https_only))
    }

    fn provisioning_state(observed: &Self::Observation) -> ProvisioningState {
        match observed.provisioning_state.as_str() {
            "Succeeded" => ProvisioningState::Succeeded,
            "Failed" => ProvisioningState::Failed(format!(
                "storage account {} failed to provision",
                observed.name
            )),
            other => ProvisioningState::InProgress(format!("storage account is {}", other)),
        }
    }

    fn connection_details(
        _desired: &Self::Parameters,
        observed: &Self::Observation,
    ) -> ConnectionDetails {
        let mut details = ConnectionDetails::new();
        details.insert(
            CONNECTION_ENDPOINT.to_string(),
            observed.primary_endpoint.clone().into_bytes(),
        );
        details.insert(
            CONNECTION_ACCOUNT_NAME.to_string(),
            observed.name.clone().into_bytes(),
        );
        details
    }
}

impl Emulated for StorageAccount {
    fn materialize(
        id: &str,
        name: &str,
        desired: &Self::Parameters,
        current: Option<&Self::Observation>,
    ) -> Self::Observation {
        StorageAccountObservation {
            id: id.to_string(),
            name: name.to_string(),
            region: current.map_or_else(|| desired.region.clone(), |c| c.region.clone()),
            sku: desired.sku.clone(),
            kind: desired
                .kind
                .clone()
                .or_else(|| current.map(|c| c.kind.clone()))
                .unwrap_or_else(|| DEFAULT_KIND.to_string()),
            access_tier: desired
                .access_tier
                .clone()
                .or_else(|| current.map(|c| c.access_tier.clone()))
                .unwrap_or_else(|| DEFAULT_ACCESS_TIER.to_string()),
            https_only: desired
                .https_only
                .or(current.map(|c| c.https_only))
                .unwrap_or(true),
            primary_endpoint: format!("https://{}.blob.cloud.mvirt.io/", name),
            provisioning_state: "Succeeded".to_string(),
            tags: desired.tags.clone(),
        }
    }

    fn set_phase(observed: &mut Self::Observation, phase: ProvisioningPhase) {
        observed.provisioning_state = match phase {
            ProvisioningPhase::Creating => "Creating",
            ProvisioningPhase::Updating => "ResolvingDNS",
            ProvisioningPhase::Succeeded => "Succeeded",
        }
        .to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StorageAccountParameters {
        StorageAccountParameters {
            region: "eastus".to_string(),
            sku: "Standard_LRS".to_string(),
            kind: None,
            access_tier: None,
            https_only: None,
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_drift_on_sku_and_tags() {
        let live = StorageAccount::materialize("acct1", "acct1", &params(), None);
        assert!(StorageAccount::is_up_to_date(&params(), &live));

        let mut grs = params();
        grs.sku = "Standard_GRS".to_string();
        assert!(!StorageAccount::is_up_to_date(&grs, &live));

        let mut tagged = params();
        tagged.tags.insert("env".to_string(), "prod".to_string());
        assert!(!StorageAccount::is_up_to_date(&tagged, &live));
    }

    #[test]
    fn test_late_initialize_keeps_user_tier() {
        let live = StorageAccount::materialize("acct1", "acct1", &params(), None);
        let mut desired = params();
        desired.access_tier = Some("Cool".to_string());

        assert!(StorageAccount::late_initialize(&mut desired, &live));
        assert_eq!(desired.access_tier.as_deref(), Some("Cool"));
        assert_eq!(desired.kind.as_deref(), Some(DEFAULT_KIND));
        assert_eq!(desired.https_only, Some(true));
    }

    #[test]
    fn test_updating_is_in_progress() {
        let mut live = StorageAccount::materialize("acct1", "acct1", &params(), None);
        StorageAccount::set_phase(&mut live, ProvisioningPhase::Updating);
        assert_eq!(
            StorageAccount::provisioning_state(&live),
            ProvisioningState::InProgress("storage account is ResolvingDNS".to_string())
        );
    }

    #[test]
    fn test_connection_details() {
        let live = StorageAccount::materialize("acct1", "acct1", &params(), None);
        let details = StorageAccount::connection_details(&params(), &live);
        assert_eq!(
            details[CONNECTION_ENDPOINT],
            b"https://acct1.blob.cloud.mvirt.io/".to_vec()
        );
        assert_eq!(details[CONNECTION_ACCOUNT_NAME], b"acct1".to_vec());
    }
}
