//! Bounded fan-out over host targets.
//!
//! One task per host, at most `concurrency` in flight. A failing host never
//! cancels its siblings and every target yields exactly one result: hosts
//! that were never dispatched (shutdown) or whose task died are reported
//! through [`FanOutResult::aborted`]. Results arrive in completion order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use wpfleet_core::HostTarget;
use wpfleet_health::{HealthVerdict, reduce};

/// A per-host result the executor can synthesize for hosts that never ran.
pub trait FanOutResult: Send + 'static {
    fn aborted(target: HostTarget, reason: String) -> Self;
}

impl FanOutResult for HealthVerdict {
    fn aborted(target: HostTarget, reason: String) -> Self {
        let mut verdict = reduce(target, Default::default());
        verdict.warnings.push(reason);
        verdict
    }
}

pub struct FleetExecutor {
    concurrency: usize,
    shutdown: Option<watch::Receiver<bool>>,
}

impl FleetExecutor {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            shutdown: None,
        }
    }

    /// Stop dispatching new hosts once `true` is sent. In-flight hosts
    /// run to completion.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run<R, F, Fut>(&self, targets: Vec<HostTarget>, op: F) -> Vec<R>
    where
        R: FanOutResult,
        F: Fn(HostTarget) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let total = targets.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let results: Arc<Mutex<Vec<R>>> = Arc::new(Mutex::new(Vec::with_capacity(total)));
        let op = Arc::new(op);
        let mut shutdown = self.shutdown.clone();

        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, HostTarget> = HashMap::new();
        let mut skipped = Vec::new();
        let mut pending = targets.into_iter();

        while let Some(target) = pending.next() {
            let acquire = Arc::clone(&semaphore).acquire_owned();
            let permit = match shutdown.as_mut() {
                Some(rx) => tokio::select! {
                    biased;
                    _ = interrupted(rx) => None,
                    permit = acquire => permit.ok(),
                },
                None => acquire.await.ok(),
            };
            let Some(permit) = permit else {
                skipped.push(target);
                skipped.extend(pending.by_ref());
                break;
            };

            debug!(host = %target, "dispatching");
            let op = Arc::clone(&op);
            let results = Arc::clone(&results);
            let worker_target = target.clone();
            let handle = tasks.spawn(async move {
                let result = op(worker_target).await;
                results.lock().await.push(result);
                drop(permit);
            });
            in_flight.insert(handle.id(), target);
        }

        if !skipped.is_empty() {
            warn!(skipped = skipped.len(), total, "interrupted, remaining hosts not started");
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, ())) => {
                    in_flight.remove(&id);
                }
                Err(e) => {
                    let reason = if e.is_panic() {
                        "worker panicked"
                    } else {
                        "worker cancelled"
                    };
                    if let Some(target) = in_flight.remove(&e.id()) {
                        warn!(host = %target, reason, "worker did not finish");
                        results
                            .lock()
                            .await
                            .push(R::aborted(target, reason.to_string()));
                    }
                }
            }
        }

        let mut results = std::mem::take(&mut *results.lock().await);
        results.extend(
            skipped
                .into_iter()
                .map(|t| R::aborted(t, "not started: interrupted".to_string())),
        );
        results
    }
}

/// Resolves once `true` has been sent. A dropped sender never interrupts.
async fn interrupted(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
