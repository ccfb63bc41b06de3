//! Virtual network rule on a database server.
//!
//! The provider addresses rules by a resource ID it assigns on creation;
//! that ID becomes the rule's external name.

use serde::{Deserialize, Serialize};

use crate::clients::Emulated;
use crate::external::{ErrorTags, ResourceKind};
use crate::pipeline::late_init;

pub struct VirtualNetworkRule;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkRuleParameters {
    /// Name of the database server the rule belongs to.
    pub server: String,
    pub subnet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_missing_endpoint: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkRuleObservation {
    pub id: String,
    pub name: String,
    pub server: String,
    pub subnet_id: String,
    pub ignore_missing_endpoint: bool,
    pub state: String,
}

impl ResourceKind for VirtualNetworkRule {
    type Parameters = VirtualNetworkRuleParameters;
    type Observation = VirtualNetworkRuleObservation;

    const KIND: &'static str = "VirtualNetworkRule";
    const TAGS: ErrorTags = ErrorTags {
        observe: "cannot get virtual network rule",
        create: "cannot create virtual network rule",
        update: "cannot update virtual network rule",
        delete: "cannot delete virtual network rule",
        connect: "cannot connect to virtual network rule provider",
        not_kind: "managed resource is not a VirtualNetworkRule",
    };

    fn is_up_to_date(desired: &Self::Parameters, observed: &Self::Observation) -> bool {
        desired.subnet_id == observed.subnet_id
            && desired
                .ignore_missing_endpoint
                .is_none_or(|v| v == observed.ignore_missing_endpoint)
    }

    fn late_initialize(desired: &mut Self::Parameters, observed: &Self::Observation) -> bool {
        late_init(
            &mut desired.ignore_missing_endpoint,
            Some(&observed.ignore_missing_endpoint),
        )
    }

    fn external_id(observed: &Self::Observation) -> Option<String> {
        Some(observed.id.clone())
    }
}

impl Emulated for VirtualNetworkRule {
    fn resource_id(subscription: &str, name: &str, desired: &Self::Parameters) -> String {
        format!(
            "/subscriptions/{}/servers/{}/virtualNetworkRules/{}",
            subscription, desired.server, name
        )
    }

    fn materialize(
        id: &str,
        name: &str,
        desired: &Self::Parameters,
        current: Option<&Self::Observation>,
    ) -> Self::Observation {
        VirtualNetworkRuleObservation {
            id: id.to_string(),
            name: name.to_string(),
            server: current.map_or_else(|| desired.server.clone(), |c| c.server.clone()),
            subnet_id: desired.subnet_id.clone(),
            ignore_missing_endpoint: desired.ignore_missing_endpoint.unwrap_or(false),
            state: "Ready".to_string(),
        }
    }
}
