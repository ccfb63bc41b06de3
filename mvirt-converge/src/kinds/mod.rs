//! Built-in resource kinds.

pub mod database;
pub mod network_rule;
pub mod storage;

pub use database::{DatabaseServer, DatabaseServerObservation, DatabaseServerParameters};
pub use network_rule::{
    VirtualNetworkRule, VirtualNetworkRuleObservation, VirtualNetworkRuleParameters,
};
pub use storage::{StorageAccount, StorageAccountObservation, StorageAccountParameters};

use crate::external::ResourceKind;

/// Static description of a supported kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindInfo {
    pub kind: &'static str,
    pub description: &'static str,
    /// Whether the kind publishes connection details.
    pub publishes_secret: bool,
}

/// Every kind this build can reconcile.
pub static CATALOG: &[KindInfo] = &[
    KindInfo {
        kind: DatabaseServer::KIND,
        description: "Managed database server",
        publishes_secret: true,
    },
    KindInfo {
        kind: StorageAccount::KIND,
        description: "Blob storage account",
        publishes_secret: true,
    },
    KindInfo {
        kind: VirtualNetworkRule::KIND,
        description: "Virtual network rule on a database server",
        publishes_secret: false,
    },
];

pub fn lookup(kind: &str) -> Option<&'static KindInfo> {
    CATALOG.iter().find(|info| info.kind == kind)
}
