//! Provider clients.
//!
//! - memory: an emulated cloud keeping resources in process, with fault
//!   and provisioning-delay injection

pub mod memory;

pub use memory::{
    CloudError, Emulated, MemoryClient, MemoryCloud, Op, ProvisioningPhase, SUBSCRIPTION_ID,
};
