//! Deletion path: release the external resource, then the finalizer.

use tracing::{debug, info};

use super::{Action, Reconciler};
use crate::error::ReconcileError;
use crate::external::{Connector, ExternalClient, Managed, ResourceKind};
use crate::finalizer;
use crate::resource::{Condition, DeletionPolicy};

impl<K, C> Reconciler<K, C>
where
    K: ResourceKind,
    C: Connector<K>,
{
    pub(super) async fn delete(&self, mut managed: Managed<K>) -> Result<Action, ReconcileError> {
        let key = managed.key();
        if !finalizer::has(&managed.metadata) {
            debug!("{} {} carries no finalizer of ours", K::KIND, key);
            return Ok(Action::await_change());
        }

        let mut baseline = managed.status.clone();
        managed.status.set_condition(Condition::deleting());
        // Ready must not stay True while the external resource goes away.
        if let Err(e) = self.write_status(&mut managed, &baseline).await {
            return self.fail(managed, &baseline, e).await;
        }
        baseline = managed.status.clone();

        match managed.spec.deletion_policy {
            DeletionPolicy::Orphan => {
                info!("Orphaning external resource of {} {}", K::KIND, key);
            }
            DeletionPolicy::Delete => {
                let client = match self.connector.connect(&managed).await {
                    Ok(client) => client,
                    Err(e) => return self.fail(managed, &baseline, e).await,
                };

                let id = Self::external_id(&managed);
                info!("Deleting {} {}", K::KIND, id);
                match client.delete(&id).await {
                    Ok(()) => {}
                    Err(e) if client.is_not_found(&e) => {
                        debug!("{} {} already gone at provider", K::KIND, id);
                    }
                    Err(e) => {
                        let err = ReconcileError::provider(K::TAGS.delete, e);
                        return self.fail(managed, &baseline, err).await;
                    }
                }
            }
        }

        finalizer::remove(&mut managed.metadata);
        if let Err(e) = self.persist_spec(&mut managed).await {
            return self.fail(managed, &baseline, e).await;
        }
        info!("Released finalizer on {} {}", K::KIND, key);
        Ok(Action::await_change())
    }
}
