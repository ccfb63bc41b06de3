//! mvirt-converge: convergence engine for externally hosted cloud resources.
//!
//! Managed resources declare what an external resource (a database server,
//! a storage account, a network rule) should look like. The engine
//! repeatedly observes the live resource, creates or updates it to match,
//! records status conditions, publishes connection details, and guards
//! deletion with a finalizer so nothing is orphaned against policy.

pub mod clients;
pub mod config;
pub mod controller;
pub mod error;
pub mod external;
pub mod finalizer;
pub mod kinds;
pub mod manifest;
pub mod pipeline;
pub mod queue;
pub mod reconciler;
pub mod resource;
pub mod secret;
pub mod store;

pub use config::EngineConfig;
pub use controller::Controller;
pub use error::{AuthError, ReconcileError};
pub use external::{
    ClientFactory, Connector, CredentialConnector, CredentialResolver, Credentials,
    ExternalClient, Managed, ProvisioningState, ResourceKind, StaticCredentials,
};
pub use reconciler::{Action, Reconciler};
