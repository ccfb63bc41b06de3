//! Error types for the convergence engine.
//!
//! Every error that leaves a reconcile pass carries a static, human-readable
//! description of the action that failed ("cannot create database server").
//! The underlying provider or storage error is kept as the source so that
//! diagnostics still see it, but it is never the whole message.

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Boxed error returned by external resource clients.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors resolving credentials for a managed resource.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The referenced provider configuration does not exist.
    #[error("provider config {0:?} not found")]
    MissingProviderConfig(String),

    /// The credential set lacks a key the client needs.
    #[error("credentials are missing key {0:?}")]
    MissingKey(String),

    /// The credentials were rejected by the client factory.
    #[error("invalid credentials: {0}")]
    Invalid(String),
}

/// Errors produced by a reconcile pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The external provider rejected or failed a call.
    #[error("{context}: {source}")]
    Provider {
        context: &'static str,
        #[source]
        source: BoxError,
    },

    /// Credentials for the provider could not be resolved.
    #[error("{context}: {source}")]
    Auth {
        context: &'static str,
        #[source]
        source: AuthError,
    },

    /// Reading or writing the managed resource (or its secret) failed.
    #[error("{context}: {source}")]
    Persistence {
        context: &'static str,
        #[source]
        source: StoreError,
    },

    /// A stored object could not be converted to or from its typed form.
    #[error("{context}: {source}")]
    Codec {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The reconciler was handed an object of another kind.
    #[error("{0}")]
    TypeMismatch(&'static str),

    /// The pass did not finish within its deadline.
    #[error("reconcile of {key} did not finish within {timeout:?}")]
    Timeout { key: String, timeout: Duration },
}

impl ReconcileError {
    pub fn provider<E>(context: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Provider {
            context,
            source: Box::new(source),
        }
    }

    pub fn auth(context: &'static str, source: AuthError) -> Self {
        Self::Auth { context, source }
    }

    pub fn persistence(context: &'static str, source: StoreError) -> Self {
        Self::Persistence { context, source }
    }

    pub fn codec(context: &'static str, source: serde_json::Error) -> Self {
        Self::Codec { context, source }
    }

    /// The static description attached to this error.
    pub fn context(&self) -> &'static str {
        match self {
            Self::Provider { context, .. }
            | Self::Auth { context, .. }
            | Self::Persistence { context, .. }
            | Self::Codec { context, .. } => context,
            Self::TypeMismatch(msg) => msg,
            Self::Timeout { .. } => "reconcile timed out",
        }
    }
}
