//! Sync path: observe, converge, record status, publish.

use tracing::{debug, info};

use super::{Action, Reconciler};
use crate::error::ReconcileError;
use crate::external::{Connector, ExternalClient, Managed, ResourceKind};
use crate::finalizer;
use crate::pipeline::{self, ConvergeAction, Observed};
use crate::resource::{Condition, external_name, set_external_name};

impl<K, C> Reconciler<K, C>
where
    K: ResourceKind,
    C: Connector<K>,
{
    pub(super) async fn sync(&self, mut managed: Managed<K>) -> Result<Action, ReconcileError> {
        let baseline = managed.status.clone();
        let key = managed.key();

        let client = match self.connector.connect(&managed).await {
            Ok(client) => client,
            Err(e) => return self.fail(managed, &baseline, e).await,
        };

        // The marker must be stored before anything exists at the provider.
        if finalizer::add(&mut managed.metadata) {
            debug!("Adding finalizer to {} {}", K::KIND, key);
            if let Err(e) = self.persist_spec(&mut managed).await {
                return self.fail(managed, &baseline, e).await;
            }
        }

        let id = Self::external_id(&managed);
        let fetched = match client.get(&id).await {
            Ok(observed) => Some(observed),
            Err(e) if client.is_not_found(&e) => {
                debug!("{} {} not found at provider", K::KIND, id);
                None
            }
            Err(e) => {
                let err = ReconcileError::provider(K::TAGS.observe, e);
                return self.fail(managed, &baseline, err).await;
            }
        };

        let observed = pipeline::observe::<K>(&mut managed.spec.for_provider, fetched);
        let action = pipeline::plan(&observed);
        debug!("Planned {:?} for {} {}", action, K::KIND, key);

        let snapshot = match observed {
            Observed::Absent => {
                info!("Creating {} {}", K::KIND, id);
                managed.status.set_condition(Condition::creating());
                let created = match client.create(&id, &managed.spec.for_provider).await {
                    Ok(created) => created,
                    Err(e) => {
                        let err = ReconcileError::provider(K::TAGS.create, e);
                        return self.fail(managed, &baseline, err).await;
                    }
                };

                // Record the provider identifier right away so the next pass
                // finds what was just created.
                let assigned = pipeline::assign_external_name::<K>(
                    external_name(&managed.metadata),
                    &id,
                    &created,
                );
                if let Some(name) = assigned {
                    debug!("Recording external name {} on {} {}", name, K::KIND, key);
                    set_external_name(&mut managed.metadata, name);
                    if let Err(e) = self.persist_spec(&mut managed).await {
                        return self.fail(managed, &baseline, e).await;
                    }
                }
                created
            }
            Observed::Present {
                observed,
                late_initialized,
                ..
            } => {
                let assigned = pipeline::assign_external_name::<K>(
                    external_name(&managed.metadata),
                    &id,
                    &observed,
                );
                let renamed = assigned.is_some();
                if let Some(name) = assigned {
                    set_external_name(&mut managed.metadata, name);
                }
                if late_initialized || renamed {
                    debug!(
                        "Persisting spec of {} {} (late-initialized: {}, external name: {})",
                        K::KIND,
                        key,
                        late_initialized,
                        renamed
                    );
                    if let Err(e) = self.persist_spec(&mut managed).await {
                        return self.fail(managed, &baseline, e).await;
                    }
                }

                if action == ConvergeAction::Nothing {
                    observed
                } else {
                    info!("Updating {} {}", K::KIND, id);
                    match client.update(&id, &managed.spec.for_provider).await {
                        Ok(updated) => updated,
                        Err(e) => {
                            let err = ReconcileError::provider(K::TAGS.update, e);
                            return self.fail(managed, &baseline, err).await;
                        }
                    }
                }
            }
        };

        let settlement = pipeline::settle(&K::provisioning_state(&snapshot), &self.config);
        let details = pipeline::publishable::<K>(&managed.spec.for_provider, &snapshot);
        managed.status.at_provider = Some(snapshot);
        managed.status.set_condition(settlement.ready);
        managed.status.set_condition(settlement.synced);

        if let (Some(details), Some(target)) =
            (details, managed.spec.write_connection_secret_to_ref.clone())
        {
            let owner = managed.owner_reference(K::KIND);
            if let Err(e) = self.publisher.publish(&owner, &target, &details).await {
                let err = ReconcileError::persistence("cannot publish connection secret", e);
                return self.fail(managed, &baseline, err).await;
            }
        }

        self.write_status(&mut managed, &baseline).await?;
        Ok(Action::requeue(settlement.requeue_after))
    }
}
