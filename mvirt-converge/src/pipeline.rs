//! The four stages of a sync pass: Observe, Converge, Persist, Publish.
//!
//! Each stage is a pure function over desired parameters and observed
//! state. The reconciler performs the I/O in between and composes them.

use std::time::Duration;

use crate::config::EngineConfig;
use crate::external::{ProvisioningState, ResourceKind};
use crate::resource::Condition;
use crate::secret::ConnectionDetails;

/// Outcome of the Observe stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed<O> {
    /// The provider has no such resource.
    Absent,
    /// The provider returned a snapshot.
    Present {
        observed: O,
        up_to_date: bool,
        late_initialized: bool,
    },
}

/// What the Converge stage should do about an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergeAction {
    Create,
    Update,
    Nothing,
}

/// Conditions and requeue interval for a resource that was just observed,
/// created or updated.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub ready: Condition,
    pub synced: Condition,
    pub requeue_after: Duration,
}

/// Observe stage: late-initialize `desired` from the snapshot, then
/// compare.
pub fn observe<K: ResourceKind>(
    desired: &mut K::Parameters,
    fetched: Option<K::Observation>,
) -> Observed<K::Observation> {
    match fetched {
        None => Observed::Absent,
        Some(observed) => {
            let late_initialized = K::late_initialize(desired, &observed);
            let up_to_date = K::is_up_to_date(desired, &observed);
            Observed::Present {
                observed,
                up_to_date,
                late_initialized,
            }
        }
    }
}

/// Converge stage.
pub fn plan<O>(observed: &Observed<O>) -> ConvergeAction {
    match observed {
        Observed::Absent => ConvergeAction::Create,
        Observed::Present {
            up_to_date: false, ..
        } => ConvergeAction::Update,
        Observed::Present { .. } => ConvergeAction::Nothing,
    }
}

/// The external name to record, if any.
///
/// Once a name is recorded it never changes. Until then, a provider
/// assigned identifier wins over the name the resource was addressed by.
pub fn assign_external_name<K: ResourceKind>(
    current: Option<&str>,
    requested: &str,
    observed: &K::Observation,
) -> Option<String> {
    if current.is_some() {
        return None;
    }
    Some(K::external_id(observed).unwrap_or_else(|| requested.to_string()))
}

/// Persist stage: conditions and requeue for a snapshot's provisioning
/// state.
pub fn settle(state: &ProvisioningState, config: &EngineConfig) -> Settlement {
    match state {
        ProvisioningState::Succeeded => Settlement {
            ready: Condition::available(),
            synced: Condition::reconcile_success(),
            requeue_after: config.poll_interval,
        },
        ProvisioningState::InProgress(msg) => Settlement {
            ready: Condition::creating().with_message(msg.clone()),
            synced: Condition::reconcile_success(),
            requeue_after: config.wait_interval,
        },
        ProvisioningState::Failed(msg) => Settlement {
            ready: Condition::unavailable().with_message(msg.clone()),
            synced: Condition::reconcile_success(),
            requeue_after: config.poll_interval,
        },
    }
}

/// Publish stage: connection details, only once provisioning succeeded.
pub fn publishable<K: ResourceKind>(
    desired: &K::Parameters,
    observed: &K::Observation,
) -> Option<ConnectionDetails> {
    if K::provisioning_state(observed) != ProvisioningState::Succeeded {
        return None;
    }
    let details = K::connection_details(desired, observed);
    (!details.is_empty()).then_some(details)
}

/// Back-fill an unset optional field. Never overwrites a set value.
pub fn late_init<T: Clone>(field: &mut Option<T>, live: Option<&T>) -> bool {
    match (field.as_ref(), live) {
        (None, Some(value)) => {
            *field = Some(value.clone());
            true
        }
        _ => false,
    }
}
