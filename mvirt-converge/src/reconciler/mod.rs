//! The convergence engine.
//!
//! A [`Reconciler`] drives managed resources of one kind toward their
//! declared state. Each call to [`Reconciler::reconcile`] is one pass: load
//! the object, then either run the sync path (observe, create or update,
//! record status, publish the connection secret) or the deletion path
//! (delete or orphan the external resource, release the finalizer).

mod delete;
mod sync;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::config::EngineConfig;
use crate::error::ReconcileError;
use crate::external::{Connector, Managed, ResourceKind};
use crate::resource::{
    Condition, ConditionStatus, ConditionType, DynamicObject, ObjectKey, ResourceStatus,
    external_name,
};
use crate::secret::ConnectionPublisher;
use crate::store::{ObjectStore, SecretStore};

/// Upper bound for recording an abandoned pass on the object.
const TIMEOUT_RECORD_DEADLINE: Duration = Duration::from_secs(10);

/// What the scheduler should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Run another pass after `duration`.
    pub fn requeue(duration: Duration) -> Self {
        Self {
            requeue_after: Some(duration),
        }
    }

    /// Wait for the next change to the object.
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// Reconciler for managed resources of kind `K`, reaching the provider
/// through connector `C`.
pub struct Reconciler<K, C> {
    store: Arc<dyn ObjectStore>,
    publisher: ConnectionPublisher,
    connector: C,
    config: EngineConfig,
    _kind: PhantomData<fn() -> K>,
}

impl<K, C> Reconciler<K, C>
where
    K: ResourceKind,
    C: Connector<K>,
{
    pub fn new(
        store: Arc<dyn ObjectStore>,
        secrets: Arc<dyn SecretStore>,
        connector: C,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            publisher: ConnectionPublisher::new(secrets),
            connector,
            config: config.normalized(),
            _kind: PhantomData,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Run one pass for `key` within the configured deadline.
    ///
    /// An object that no longer exists is a success. A pass that overruns
    /// its deadline is abandoned and reported as [`ReconcileError::Timeout`].
    #[instrument(skip(self), fields(kind = K::KIND, key = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let timeout = self.config.reconcile_timeout;
        match tokio::time::timeout(timeout, self.load_and_reconcile(key)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Reconcile of {} {} timed out after {:?}", K::KIND, key, timeout);
                let err = ReconcileError::Timeout {
                    key: key.to_string(),
                    timeout,
                };
                self.record_timeout(key, &err).await;
                Err(err)
            }
        }
    }

    /// Record an abandoned pass on a freshly loaded copy of the object.
    async fn record_timeout(&self, key: &ObjectKey, err: &ReconcileError) {
        let deadline = self.config.reconcile_timeout.min(TIMEOUT_RECORD_DEADLINE);
        match tokio::time::timeout(deadline, self.mark_abandoned(key, err)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Cannot record timeout on {} {}: {}", K::KIND, key, e),
            Err(_) => warn!("Recording timeout on {} {} timed out", K::KIND, key),
        }
    }

    async fn load_and_reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let object = match self.store.get(K::KIND, key).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => {
                debug!("{} {} is gone, nothing to do", K::KIND, key);
                return Ok(Action::await_change());
            }
            Err(e) => {
                return Err(ReconcileError::persistence(
                    "cannot get managed resource",
                    e,
                ));
            }
        };
        self.reconcile_object(object).await
    }

    /// Run one pass over an already loaded object.
    pub async fn reconcile_object(&self, object: DynamicObject) -> Result<Action, ReconcileError> {
        let managed = Self::decode(object)?;
        if managed.metadata.is_deleting() {
            self.delete(managed).await
        } else {
            self.sync(managed).await
        }
    }

    fn decode(object: DynamicObject) -> Result<Managed<K>, ReconcileError> {
        if object.kind != K::KIND {
            return Err(ReconcileError::TypeMismatch(K::TAGS.not_kind));
        }
        Managed::<K>::from_dynamic(object)
            .map_err(|e| ReconcileError::codec("cannot decode managed resource", e))
    }

    /// The identifier the provider knows this resource by.
    fn external_id(managed: &Managed<K>) -> String {
        external_name(&managed.metadata)
            .unwrap_or(&managed.metadata.name)
            .to_string()
    }

    /// Record `err` on the object's status and hand it back to the caller.
    ///
    /// `Synced` becomes `False/ReconcileError`. A `Ready=True` (or missing)
    /// condition is flipped to `False/Unavailable` so a failed pass never
    /// leaves a stale ready signal behind. Failing to record the status
    /// does not replace the original error.
    async fn fail(
        &self,
        mut managed: Managed<K>,
        baseline: &ResourceStatus<K::Observation>,
        err: ReconcileError,
    ) -> Result<Action, ReconcileError> {
        warn!("Reconcile of {} {} failed: {}", K::KIND, managed.key(), err);

        Self::mark_failed(&mut managed, &err);
        if let Err(e) = self.write_status(&mut managed, baseline).await {
            warn!("Cannot record failure on {} {}: {}", K::KIND, managed.key(), e);
        }
        Err(err)
    }

    async fn mark_abandoned(
        &self,
        key: &ObjectKey,
        err: &ReconcileError,
    ) -> Result<(), ReconcileError> {
        let object = match self.store.get(K::KIND, key).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                return Err(ReconcileError::persistence(
                    "cannot get managed resource",
                    e,
                ));
            }
        };
        let mut managed = Self::decode(object)?;
        let baseline = managed.status.clone();
        Self::mark_failed(&mut managed, err);
        self.write_status(&mut managed, &baseline).await
    }

    /// `Synced` becomes `False/ReconcileError`; `Ready` is flipped to
    /// `False/Unavailable` unless it already reports a reason to be false.
    fn mark_failed(managed: &mut Managed<K>, err: &ReconcileError) {
        managed
            .status
            .set_condition(Condition::reconcile_error(err.to_string()));
        let ready_status = managed
            .status
            .conditions
            .get(ConditionType::Ready)
            .map(|c| c.status);
        if matches!(ready_status, None | Some(ConditionStatus::True)) {
            managed
                .status
                .set_condition(Condition::unavailable().with_message(err.context()));
        }
    }

    /// Write metadata and spec, refreshing the in-memory metadata.
    async fn persist_spec(&self, managed: &mut Managed<K>) -> Result<(), ReconcileError> {
        let object = managed
            .to_dynamic(K::KIND)
            .map_err(|e| ReconcileError::codec("cannot encode managed resource", e))?;
        let stored = self
            .store
            .update(object)
            .await
            .map_err(|e| ReconcileError::persistence("cannot update managed resource", e))?;
        managed.metadata = stored.metadata;
        Ok(())
    }

    /// Write the status subresource unless it is unchanged from `baseline`.
    async fn write_status(
        &self,
        managed: &mut Managed<K>,
        baseline: &ResourceStatus<K::Observation>,
    ) -> Result<(), ReconcileError> {
        if managed.status.equivalent(baseline) {
            debug!("Status of {} {} unchanged", K::KIND, managed.key());
            return Ok(());
        }

        let object = managed
            .to_dynamic(K::KIND)
            .map_err(|e| ReconcileError::codec("cannot encode managed resource", e))?;
        let stored = self.store.update_status(object).await.map_err(|e| {
            ReconcileError::persistence("cannot update managed resource status", e)
        })?;
        managed.metadata.resource_version = stored.metadata.resource_version;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_requeue() {
        let action = Action::requeue(Duration::from_secs(15));
        assert_eq!(action.requeue_after(), Some(Duration::from_secs(15)));
        assert_eq!(Action::await_change().requeue_after(), None);
    }
}
