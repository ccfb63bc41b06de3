//! Controller loop: turns store events and requeue timers into reconcile
//! passes.
//!
//! The controller lists every object of its kind on start, then follows the
//! store's watch stream. Passes run on a bounded set of workers; the work
//! queue guarantees that two passes for the same object never overlap.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::ReconcileError;
use crate::external::{Connector, ResourceKind};
use crate::queue::{Backoff, WorkQueue};
use crate::reconciler::{Action, Reconciler};
use crate::resource::ObjectKey;
use crate::store::WatchEvent;

type PassResult = (ObjectKey, Result<Result<Action, ReconcileError>, JoinError>);

/// Drives a [`Reconciler`] for every object of one kind.
pub struct Controller<K, C> {
    reconciler: Arc<Reconciler<K, C>>,
}

impl<K, C> Controller<K, C>
where
    K: ResourceKind,
    C: Connector<K> + 'static,
{
    pub fn new(reconciler: Arc<Reconciler<K, C>>) -> Self {
        Self { reconciler }
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ReconcileError> {
        let config = self.reconciler.config().clone();
        let mut events = self.reconciler.store().watch();
        let mut queue = WorkQueue::new();
        let mut backoff = Backoff::new(config.error_backoff_base, config.max_backoff);
        let mut workers: JoinSet<PassResult> = JoinSet::new();

        self.relist(&mut queue).await?;
        info!(
            "Started {} controller with {} workers",
            K::KIND,
            config.concurrency
        );

        loop {
            let now = Instant::now();
            while workers.len() < config.concurrency {
                let Some(key) = queue.pop_ready(now) else {
                    break;
                };
                self.spawn_pass(&mut workers, key);
            }

            let has_capacity = workers.len() < config.concurrency;
            let deadline = queue.next_deadline();

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => self.on_event(&mut queue, &mut backoff, event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("{} controller missed {} watch events, relisting", K::KIND, missed);
                        if let Err(e) = self.relist(&mut queue).await {
                            error!("Relist of {} failed: {}", K::KIND, e);
                        }
                    }
                    Err(RecvError::Closed) => {
                        error!("Watch stream for {} closed", K::KIND);
                        break;
                    }
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => match joined {
                    Ok((key, outcome)) => Self::on_pass_done(&mut queue, &mut backoff, key, outcome),
                    Err(e) => error!("{} worker task failed: {}", K::KIND, e),
                },
                _ = sleep_until(deadline), if has_capacity => {}
            }
        }

        info!("Stopping {} controller", K::KIND);
        workers.shutdown().await;
        Ok(())
    }

    async fn relist(&self, queue: &mut WorkQueue) -> Result<(), ReconcileError> {
        let objects = self
            .reconciler
            .store()
            .list(K::KIND)
            .await
            .map_err(|e| ReconcileError::persistence("cannot list managed resources", e))?;
        debug!("Listed {} {} objects", objects.len(), K::KIND);
        let now = Instant::now();
        for object in objects {
            queue.schedule(object.key(), now);
        }
        Ok(())
    }

    fn spawn_pass(&self, workers: &mut JoinSet<PassResult>, key: ObjectKey) {
        let reconciler = Arc::clone(&self.reconciler);
        let pass_key = key.clone();
        // The inner task turns a panicking pass into a JoinError that still
        // carries its key. Aborting the worker aborts the pass with it.
        let mut pass = AbortOnDrop(tokio::spawn(async move {
            reconciler.reconcile(&pass_key).await
        }));
        workers.spawn(async move {
            let outcome = (&mut pass.0).await;
            (key, outcome)
        });
    }

    fn on_event(&self, queue: &mut WorkQueue, backoff: &mut Backoff, event: WatchEvent) {
        if event.kind() != K::KIND {
            return;
        }
        if let WatchEvent::Deleted { key, .. } = &event {
            backoff.reset(key);
        }
        queue.schedule(event.key().clone(), Instant::now());
    }

    fn on_pass_done(
        queue: &mut WorkQueue,
        backoff: &mut Backoff,
        key: ObjectKey,
        outcome: Result<Result<Action, ReconcileError>, JoinError>,
    ) {
        match outcome {
            Ok(Ok(action)) => {
                backoff.reset(&key);
                let next = action.requeue_after().map(|after| Instant::now() + after);
                queue.finish(&key, next);
            }
            Ok(Err(e)) => {
                let delay = backoff.next(&key);
                warn!(
                    "Reconcile of {} {} failed, retrying in {:?}: {}",
                    K::KIND,
                    key,
                    delay,
                    e
                );
                queue.retry(&key, Instant::now() + delay);
            }
            Err(e) => {
                let delay = backoff.next(&key);
                error!("Reconcile of {} {} panicked: {}", K::KIND, key, e);
                queue.retry(&key, Instant::now() + delay);
            }
        }
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
