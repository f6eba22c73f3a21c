//! Incremental pull scheduler.
//!
//! Each cycle pulls `[cursor, now)` from the ticket source, enqueues the
//! normalized rows and only then advances the cursor. A failed pull leaves
//! the cursor where it was so the same window is retried next cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::SourceError;
use crate::source::{SourceTimezone, TicketSource, normalize_rows};
use crate::store::{CursorStore, DurableQueue};

/// What one pull cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub fetched: usize,
    pub dropped: usize,
    pub enqueued: usize,
}

pub struct Puller {
    source: Arc<dyn TicketSource>,
    queue: Arc<DurableQueue>,
    cursor_store: CursorStore,
    cursor: Mutex<Option<DateTime<Utc>>>,
    poll_interval: Duration,
    lookback: chrono::Duration,
    timezone: SourceTimezone,
}

impl Puller {
    /// Load the stored cursor and build the puller.
    pub async fn new(
        source: Arc<dyn TicketSource>,
        queue: Arc<DurableQueue>,
        cursor_store: CursorStore,
        poll_interval: Duration,
        lookback: Duration,
    ) -> Self {
        let cursor = cursor_store.load().await;
        info!(cursor = ?cursor, "Puller initialized");
        Self {
            source,
            queue,
            cursor_store,
            cursor: Mutex::new(cursor),
            poll_interval,
            lookback: chrono::Duration::from_std(lookback)
                .unwrap_or_else(|_| chrono::Duration::minutes(30)),
            timezone: SourceTimezone::default(),
        }
    }

    /// Zone naive row timestamps are read in.
    pub fn with_timezone(mut self, timezone: SourceTimezone) -> Self {
        self.timezone = timezone;
        self
    }

    /// Current cursor value.
    pub async fn cursor(&self) -> Option<DateTime<Utc>> {
        *self.cursor.lock().await
    }

    pub async fn pull_once(&self) -> Result<PullSummary, SourceError> {
        self.pull_once_at(Utc::now()).await
    }

    /// One pull cycle with an explicit clock reading.
    pub async fn pull_once_at(&self, now: DateTime<Utc>) -> Result<PullSummary, SourceError> {
        let start = self.cursor().await.unwrap_or(now - self.lookback);

        let mut summary = PullSummary::default();
        if start < now {
            info!(start = %start, end = %now, "Pulling tickets");
            let rows = self.source.pull(start, now).await?;
            summary.fetched = rows.len();

            let (items, dropped) = normalize_rows(rows, self.timezone);
            summary.dropped = dropped;

            summary.enqueued = match self.queue.enqueue(items).await {
                Ok(n) => n,
                Err(e) => {
                    // Items are held in memory and re-flushed by the drainer.
                    error!(error = %e, "Queue persistence failed after pull");
                    0
                }
            };
        } else {
            debug!(start = %start, end = %now, "Empty pull window, skipping source call");
        }

        // Never move backwards, even if the clock does.
        let next = {
            let mut cursor = self.cursor.lock().await;
            let next = match *cursor {
                Some(prev) if prev > now => prev,
                _ => now,
            };
            *cursor = Some(next);
            next
        };
        if let Err(e) = self.cursor_store.save(next).await {
            error!(error = %e, "Failed to persist pull cursor");
        }

        info!(
            fetched = summary.fetched,
            dropped = summary.dropped,
            enqueued = summary.enqueued,
            cursor = %next,
            "Pull complete"
        );
        Ok(summary)
    }

    /// Run forever: pull immediately, then every `poll_interval` measured
    /// from the end of the previous pull.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.poll_interval.as_secs(), "Puller started");
            loop {
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = self.pull_once().await {
                    warn!(error = %e, "Pull failed, cursor unchanged");
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("Puller stopped");
        })
    }
}
