//! Outbox reconciliation
//!
//! Desk actions apply locally and queue a [`RemoteIntent`]. The reconciler
//! replays queued intents against the hosted database in FIFO order. A
//! transient failure ends the pass so later writes to the same row cannot
//! overtake an earlier one; permanent failures are recorded and skipped.
//! Intents that keep failing are parked by the store and no longer block
//! the queue.

use spadesk_api::SyncReport;
use spadesk_store::{IntentOp, RemoteIntent, Store};
use spadesk_util::{Result, with_timeout};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{Query, RemoteDatabase};

const DEFAULT_BATCH: usize = 100;

/// Drains the outbox into the hosted database
pub struct Reconciler {
    db: Arc<dyn RemoteDatabase>,
    store: Arc<dyn Store>,
    timeout: Duration,
    batch_size: usize,
    /// Held for the duration of a pass
    running: Mutex<()>,
}

impl Reconciler {
    pub fn new(db: Arc<dyn RemoteDatabase>, store: Arc<dyn Store>) -> Self {
        Self {
            db,
            store,
            timeout: Duration::from_secs(10),
            batch_size: DEFAULT_BATCH,
            running: Mutex::new(()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run one reconciliation pass. A pass already in progress makes this
    /// return immediately with nothing attempted.
    pub async fn run_once(&self) -> Result<SyncReport> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Reconciliation already running, skipping");
            return Ok(SyncReport {
                remaining: self.store.pending_intent_count()?,
                parked: self.store.parked_intent_count()?,
                ..Default::default()
            });
        };

        let pending = self.store.pending_intents(self.batch_size)?;
        let mut report = SyncReport::default();

        for intent in pending {
            report.attempted += 1;

            match self.apply(&intent).await {
                Ok(()) => {
                    self.store.mark_intent_synced(intent.id)?;
                    report.synced += 1;
                    debug!(
                        intent_id = intent.id,
                        table = %intent.table,
                        op = %intent.operation,
                        "Intent synced"
                    );
                }
                Err(e) => {
                    self.store.mark_intent_failed(intent.id, &e.to_string())?;
                    report.failed += 1;
                    warn!(
                        intent_id = intent.id,
                        table = %intent.table,
                        op = %intent.operation,
                        attempts = intent.attempts + 1,
                        error = %e,
                        "Intent failed"
                    );

                    if e.is_retryable() {
                        break;
                    }
                }
            }
        }

        if report.synced > 0 {
            self.store.prune_synced_intents()?;
        }
        report.remaining = self.store.pending_intent_count()?;
        report.parked = self.store.parked_intent_count()?;

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                synced = report.synced,
                failed = report.failed,
                remaining = report.remaining,
                parked = report.parked,
                "Reconciliation pass finished"
            );
        }

        Ok(report)
    }

    async fn apply(&self, intent: &RemoteIntent) -> Result<()> {
        let table = intent.table.as_str();
        match intent.operation {
            IntentOp::Insert => {
                let inserted =
                    with_timeout(self.timeout, self.db.insert(table, &intent.payload)).await;
                if let Err(e) = inserted {
                    // An earlier attempt may have landed before its response
                    // was lost
                    if e.is_retryable() || !self.row_exists(table, &intent.row_id).await {
                        return Err(e);
                    }
                    debug!(
                        intent_id = intent.id,
                        table,
                        row_id = %intent.row_id,
                        "Row already present, treating insert as synced"
                    );
                }
            }
            IntentOp::Update => {
                with_timeout(
                    self.timeout,
                    self.db.update(table, &intent.row_id, &intent.payload),
                )
                .await?;
            }
            IntentOp::Delete => {
                with_timeout(self.timeout, self.db.delete(table, &intent.row_id)).await?;
                if let Err(e) = self.store.cache_remove(table, &intent.row_id) {
                    warn!(table, row_id = %intent.row_id, error = %e, "Failed to drop cached row");
                }
            }
        }
        Ok(())
    }

    async fn row_exists(&self, table: &str, row_id: &str) -> bool {
        let query = Query::new().eq("id", row_id).limit(1);
        match with_timeout(self.timeout, self.db.select(table, &query)).await {
            Ok(rows) => !rows.is_empty(),
            Err(e) => {
                debug!(table, row_id, error = %e, "Existence check failed");
                false
            }
        }
    }
}
