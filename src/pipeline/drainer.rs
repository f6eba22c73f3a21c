//! Batch drain loop.
//!
//! One cycle: drop what the ledger already has, peek a bounded batch of the
//! rest, run it concurrently, then reconcile. Completed IDs go into the ledger
//! first and leave the queue only once the ledger is on disk, so a crash
//! between the two steps re-peeks items the next cycle filters out.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::pipeline::types::{Outcome, WorkItem, WorkerReport};
use crate::pipeline::worker::Worker;
use crate::store::{DurableQueue, Ledger};

/// Tunables for the drain loop.
#[derive(Debug, Clone)]
pub struct DrainerConfig {
    /// Batch size and worker concurrency.
    pub max_concurrent: usize,
    /// Sleep when the queue is empty or a cycle completed nothing.
    pub idle_interval: Duration,
    /// Dead-letter an item once it has failed this many times. `None` retries forever.
    pub max_attempts: Option<u32>,
}

/// What one drain cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub peeked: usize,
    /// Already in the ledger; dropped without running a worker.
    pub already_completed: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl CycleSummary {
    /// Whether the cycle moved anything out of the queue.
    pub fn made_progress(&self) -> bool {
        self.already_completed + self.succeeded + self.dead_lettered > 0
    }
}

pub struct Drainer {
    queue: Arc<DurableQueue>,
    ledger: Arc<Ledger>,
    dead_letters: Arc<DurableQueue>,
    worker: Arc<Worker>,
    config: DrainerConfig,
}

impl Drainer {
    pub fn new(
        queue: Arc<DurableQueue>,
        ledger: Arc<Ledger>,
        dead_letters: Arc<DurableQueue>,
        worker: Arc<Worker>,
        config: DrainerConfig,
    ) -> Self {
        Self {
            queue,
            ledger,
            dead_letters,
            worker,
            config: DrainerConfig {
                max_concurrent: config.max_concurrent.max(1),
                ..config
            },
        }
    }

    pub fn config(&self) -> &DrainerConfig {
        &self.config
    }

    /// Run one drain cycle.
    pub async fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();
        if self.queue.is_empty().await {
            debug!("Queue empty, nothing to drain");
            return summary;
        }

        self.heal_stores().await;

        // Ledgered items must never take a batch slot, even while unremovable.
        let queued = self.queue.ids().await;
        let done = self
            .ledger
            .completed_among(queued.iter().map(String::as_str))
            .await;
        if !done.is_empty() && self.drop_already_completed(&done).await {
            summary.already_completed = done.len();
        }

        let pending = self
            .queue
            .peek_batch_excluding(self.config.max_concurrent, &done)
            .await;
        summary.peeked = pending.len();
        if pending.is_empty() {
            return summary;
        }
        info!(size = pending.len(), "Draining batch");

        let by_id: HashMap<String, WorkItem> = pending
            .iter()
            .map(|i| (i.interaction_id.clone(), i.clone()))
            .collect();
        let reports = self.run_workers(pending).await;
        self.reconcile(reports, &by_id, &mut summary).await;

        info!(
            peeked = summary.peeked,
            already_completed = summary.already_completed,
            succeeded = summary.succeeded,
            retried = summary.retried,
            dead_lettered = summary.dead_lettered,
            "Drain cycle complete"
        );
        summary
    }

    /// Retry any earlier failed writes before touching state again.
    async fn heal_stores(&self) {
        if let Err(e) = self.ledger.flush_if_dirty().await {
            error!(error = %e, "Ledger still not persisted");
        }
        if let Err(e) = self.queue.flush_if_dirty().await {
            error!(error = %e, "Queue still not persisted");
        }
        if let Err(e) = self.dead_letters.flush_if_dirty().await {
            error!(error = %e, "Dead-letter queue still not persisted");
        }
    }

    /// Returns whether the items were removed.
    async fn drop_already_completed(&self, done: &HashSet<String>) -> bool {
        info!(count = done.len(), "Skipping already processed items");
        // Only trust the ledger for removal once it is on disk.
        if self.ledger.is_dirty().await {
            warn!("Ledger has unflushed entries, keeping completed items queued");
            return false;
        }
        match self.queue.remove(done).await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Failed to remove already processed items");
                false
            }
        }
    }

    /// Run every item on its own task and wait for all of them.
    ///
    /// A panicking worker is caught and reported as a transient failure.
    /// Dropping the returned future aborts the whole set.
    async fn run_workers(&self, items: Vec<WorkItem>) -> Vec<WorkerReport> {
        let mut set = JoinSet::new();
        for item in items {
            let worker = self.worker.clone();
            let interaction_id = item.interaction_id.clone();
            set.spawn(async move {
                match AssertUnwindSafe(worker.process(item)).catch_unwind().await {
                    Ok(report) => report,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(interaction_id = %interaction_id, panic = %message, "Worker panicked");
                        WorkerReport {
                            interaction_id,
                            outcome: Outcome::Retry {
                                error: format!("worker panicked: {message}"),
                            },
                            artifact: None,
                        }
                    }
                }
            });
        }

        let mut reports = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                // Item stays queued untouched.
                Err(e) => error!(error = %e, "Worker task did not complete"),
            }
        }
        reports
    }

    async fn reconcile(
        &self,
        reports: Vec<WorkerReport>,
        by_id: &HashMap<String, WorkItem>,
        summary: &mut CycleSummary,
    ) {
        let mut completed: HashSet<String> = HashSet::new();
        let mut failures: HashMap<String, String> = HashMap::new();
        let mut exhausted: Vec<WorkItem> = Vec::new();

        for report in reports {
            let Some(item) = by_id.get(&report.interaction_id) else {
                warn!(interaction_id = %report.interaction_id, "Report for unknown item");
                continue;
            };
            match report.outcome {
                Outcome::Responded | Outcome::Skipped { .. } => {
                    completed.insert(report.interaction_id);
                }
                Outcome::Retry { error } => {
                    let attempts = item.attempts.saturating_add(1);
                    if self.config.max_attempts.is_some_and(|cap| attempts >= cap) {
                        warn!(
                            interaction_id = %item.interaction_id,
                            attempts,
                            "Retry budget exhausted, dead-lettering"
                        );
                        exhausted.push(WorkItem {
                            attempts,
                            last_error: Some(error),
                            ..item.clone()
                        });
                    } else {
                        failures.insert(report.interaction_id, error);
                    }
                }
                Outcome::Reject { error } => {
                    warn!(interaction_id = %item.interaction_id, error = %error, "Dead-lettering rejected item");
                    exhausted.push(WorkItem {
                        last_error: Some(error),
                        ..item.clone()
                    });
                }
            }
        }

        summary.succeeded = completed.len();
        summary.retried = failures.len();

        let mut to_remove: HashSet<String> = HashSet::new();

        if !exhausted.is_empty() {
            let ids: HashSet<String> = exhausted.iter().map(|i| i.interaction_id.clone()).collect();
            match self.dead_letters.enqueue(exhausted).await {
                Ok(_) => {
                    summary.dead_lettered = ids.len();
                    to_remove.extend(ids);
                }
                Err(e) => error!(error = %e, "Failed to persist dead letters, keeping items queued"),
            }
        }

        if let Err(e) = self.queue.bump_attempts(&failures).await {
            error!(error = %e, "Failed to persist retry counts");
        }

        if !completed.is_empty() {
            match self.ledger.mark_completed(completed.iter().cloned()).await {
                Ok(_) => to_remove.extend(completed),
                Err(e) => error!(
                    error = %e,
                    "Ledger flush failed, completed items stay queued until it succeeds"
                ),
            }
        }

        match self.queue.remove(&to_remove).await {
            Ok(removed) => debug!(removed, "Removed finished items from queue"),
            Err(e) => error!(error = %e, "Failed to persist queue after removal"),
        }
    }

    /// Run forever until `shutdown` flips. Shutting down mid-cycle drops the
    /// in-flight batch; its items are still queued for the next start.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                max_concurrent = self.config.max_concurrent,
                idle_secs = self.config.idle_interval.as_secs(),
                "Drainer started"
            );
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let summary = tokio::select! {
                    summary = self.run_cycle() => summary,
                    _ = shutdown.changed() => break,
                };
                if summary.made_progress() {
                    continue;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.config.idle_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("Drainer stopped");
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_extracts_payload() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn progress_counts_every_exit_from_the_queue() {
        assert!(!CycleSummary::default().made_progress());
        assert!(
            !CycleSummary {
                peeked: 3,
                retried: 3,
                ..Default::default()
            }
            .made_progress()
        );
        assert!(
            CycleSummary {
                dead_lettered: 1,
                ..Default::default()
            }
            .made_progress()
        );
    }
}
