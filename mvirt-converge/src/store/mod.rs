//! Storage for managed resources and connection secrets.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{MemorySecretStore, MemoryStore};
pub use traits::{ObjectStore, Secret, SecretStore, WatchEvent};
