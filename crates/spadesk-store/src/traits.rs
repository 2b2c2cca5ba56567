//! Store trait definitions

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use spadesk_api::{ClosingReport, Room, Service, Session, Therapist, WalkOut};

use crate::{AuditEvent, RemoteIntent, StoreResult};

/// Main store trait
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Outbox

    /// Queue a remote write, returning its outbox id
    fn enqueue_intent(&self, intent: &RemoteIntent) -> StoreResult<i64>;

    /// Oldest unsynced intents first. Parked intents are not returned.
    fn pending_intents(&self, limit: usize) -> StoreResult<Vec<RemoteIntent>>;

    fn mark_intent_synced(&self, id: i64) -> StoreResult<()>;

    /// Record a failed attempt; the intent stays pending
    fn mark_intent_failed(&self, id: i64, error: &str) -> StoreResult<()>;

    /// Unsynced intents that are still retried
    fn pending_intent_count(&self) -> StoreResult<usize>;

    /// Intents that failed [`MAX_INTENT_ATTEMPTS`](crate::MAX_INTENT_ATTEMPTS) times
    fn parked_intent_count(&self) -> StoreResult<usize>;

    /// Delete intents the hosted database acknowledged, returning how many
    fn prune_synced_intents(&self) -> StoreResult<usize>;

    // Entity cache

    fn cache_put(&self, table: &str, id: &str, row: &serde_json::Value) -> StoreResult<()>;

    fn cache_remove(&self, table: &str, id: &str) -> StoreResult<()>;

    fn cache_list(&self, table: &str) -> StoreResult<Vec<serde_json::Value>>;

    /// Replace everything cached for `table`
    fn cache_replace(&self, table: &str, rows: &[(String, serde_json::Value)]) -> StoreResult<()>;

    // Desk snapshot

    /// Load last saved snapshot
    fn load_snapshot(&self) -> StoreResult<Option<DeskSnapshot>>;

    fn save_snapshot(&self, snapshot: &DeskSnapshot) -> StoreResult<()>;

    // Closing reports

    /// Save a closing report, replacing any earlier one for the same day
    fn save_closing_report(&self, report: &ClosingReport) -> StoreResult<()>;

    fn closing_report(&self, day: NaiveDate) -> StoreResult<Option<ClosingReport>>;

    /// Reports with `from <= business_day <= to`, in day order
    fn closing_reports_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<ClosingReport>>;

    // Health

    fn is_healthy(&self) -> bool;
}

/// Desk state saved for crash recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeskSnapshot {
    pub saved_at: DateTime<Local>,
    pub business_day: NaiveDate,
    pub therapists: Vec<Therapist>,
    pub rooms: Vec<Room>,
    pub services: Vec<Service>,
    pub sessions: Vec<Session>,
    pub walk_outs: Vec<WalkOut>,
    /// Remote writes the outbox could not take yet, oldest first
    #[serde(default)]
    pub unqueued: Vec<RemoteIntent>,
}
