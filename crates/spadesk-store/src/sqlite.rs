//! SQLite-based store implementation

use chrono::{DateTime, Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};
use spadesk_api::ClosingReport;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{
    AuditEvent, DeskSnapshot, IntentOp, MAX_INTENT_ATTEMPTS, RemoteIntent, Store, StoreError,
    StoreResult,
};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Outbox of remote writes
            CREATE TABLE IF NOT EXISTS outbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_name TEXT NOT NULL,
                operation TEXT NOT NULL,
                row_id TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                synced_at TEXT
            );

            -- Local mirror of hosted rows
            CREATE TABLE IF NOT EXISTS entity_cache (
                table_name TEXT NOT NULL,
                row_id TEXT NOT NULL,
                row_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (table_name, row_id)
            );

            -- Desk snapshot (single row)
            CREATE TABLE IF NOT EXISTS snapshot (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                snapshot_json TEXT NOT NULL
            );

            -- One closing report per business day
            CREATE TABLE IF NOT EXISTS closing_reports (
                business_day TEXT PRIMARY KEY,
                closed_at TEXT NOT NULL,
                report_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox(synced_at, id);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn parse_stored_time(s: &str) -> DateTime<Local> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .unwrap_or_else(|_| spadesk_util::now())
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp: parse_stored_time(&timestamp_str),
                event,
            });
        }

        Ok(events)
    }

    fn enqueue_intent(&self, intent: &RemoteIntent) -> StoreResult<i64> {
        let conn = self.conn()?;
        let payload = serde_json::to_string(&intent.payload)?;

        conn.execute(
            r#"
            INSERT INTO outbox (table_name, operation, row_id, payload_json, attempts, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
            params![
                intent.table,
                intent.operation.as_str(),
                intent.row_id,
                payload,
                intent.created_at.to_rfc3339()
            ],
        )?;

        let id = conn.last_insert_rowid();
        debug!(
            intent_id = id,
            table = %intent.table,
            op = %intent.operation,
            row_id = %intent.row_id,
            "Remote intent queued"
        );
        Ok(id)
    }

    fn pending_intents(&self, limit: usize) -> StoreResult<Vec<RemoteIntent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, table_name, operation, row_id, payload_json, attempts, last_error, created_at
            FROM outbox
            WHERE synced_at IS NULL AND attempts < ?
            ORDER BY id ASC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(params![MAX_INTENT_ATTEMPTS, limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut intents = Vec::new();
        for row in rows {
            let (id, table, op, row_id, payload_json, attempts, last_error, created_at) = row?;
            let Some(operation) = IntentOp::parse(&op) else {
                warn!(intent_id = id, op = %op, "Skipping outbox row with unknown operation");
                continue;
            };

            intents.push(RemoteIntent {
                id,
                table,
                operation,
                row_id,
                payload: serde_json::from_str(&payload_json)?,
                attempts: attempts.max(0) as u32,
                last_error,
                created_at: parse_stored_time(&created_at),
            });
        }

        Ok(intents)
    }

    fn mark_intent_synced(&self, id: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE outbox SET synced_at = ?, last_error = NULL WHERE id = ?",
            params![spadesk_util::now().to_rfc3339(), id],
        )?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("outbox intent {}", id)));
        }
        Ok(())
    }

    fn mark_intent_failed(&self, id: i64, error: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE outbox SET attempts = attempts + 1, last_error = ? WHERE id = ?",
            params![error, id],
        )?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("outbox intent {}", id)));
        }
        Ok(())
    }

    fn pending_intent_count(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE synced_at IS NULL AND attempts < ?",
            [MAX_INTENT_ATTEMPTS],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    fn parked_intent_count(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE synced_at IS NULL AND attempts >= ?",
            [MAX_INTENT_ATTEMPTS],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    fn prune_synced_intents(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM outbox WHERE synced_at IS NOT NULL", [])?;
        if deleted > 0 {
            debug!(deleted, "Pruned synced outbox rows");
        }
        Ok(deleted)
    }

    fn cache_put(&self, table: &str, id: &str, row: &serde_json::Value) -> StoreResult<()> {
        let conn = self.conn()?;
        let json = serde_json::to_string(row)?;

        conn.execute(
            r#"
            INSERT INTO entity_cache (table_name, row_id, row_json, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(table_name, row_id)
            DO UPDATE SET row_json = excluded.row_json, updated_at = excluded.updated_at
            "#,
            params![table, id, json, spadesk_util::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn cache_remove(&self, table: &str, id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM entity_cache WHERE table_name = ? AND row_id = ?",
            params![table, id],
        )?;
        Ok(())
    }

    fn cache_list(&self, table: &str) -> StoreResult<Vec<serde_json::Value>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT row_json FROM entity_cache WHERE table_name = ? ORDER BY row_id ASC",
        )?;

        let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;

        let mut values = Vec::new();
        for row in rows {
            values.push(serde_json::from_str(&row?)?);
        }
        Ok(values)
    }

    fn cache_replace(&self, table: &str, rows: &[(String, serde_json::Value)]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let now = spadesk_util::now().to_rfc3339();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM entity_cache WHERE table_name = ?", [table])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO entity_cache (table_name, row_id, row_json, updated_at) VALUES (?, ?, ?, ?)",
            )?;
            for (id, row) in rows {
                stmt.execute(params![table, id, serde_json::to_string(row)?, now])?;
            }
        }
        tx.commit()?;

        debug!(table, rows = rows.len(), "Cache refreshed");
        Ok(())
    }

    fn load_snapshot(&self) -> StoreResult<Option<DeskSnapshot>> {
        let conn = self.conn()?;

        let json: Option<String> = conn
            .query_row("SELECT snapshot_json FROM snapshot WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    fn save_snapshot(&self, snapshot: &DeskSnapshot) -> StoreResult<()> {
        let conn = self.conn()?;
        let json = serde_json::to_string(snapshot)?;

        conn.execute(
            r#"
            INSERT INTO snapshot (id, snapshot_json)
            VALUES (1, ?)
            ON CONFLICT(id)
            DO UPDATE SET snapshot_json = excluded.snapshot_json
            "#,
            [json],
        )?;

        debug!("Snapshot saved");
        Ok(())
    }

    fn save_closing_report(&self, report: &ClosingReport) -> StoreResult<()> {
        let conn = self.conn()?;
        let json = serde_json::to_string(report)?;

        conn.execute(
            r#"
            INSERT INTO closing_reports (business_day, closed_at, report_json)
            VALUES (?, ?, ?)
            ON CONFLICT(business_day)
            DO UPDATE SET closed_at = excluded.closed_at, report_json = excluded.report_json
            "#,
            params![
                day_key(report.business_day),
                report.closed_at.to_rfc3339(),
                json
            ],
        )?;

        debug!(day = %report.business_day, "Closing report saved");
        Ok(())
    }

    fn closing_report(&self, day: NaiveDate) -> StoreResult<Option<ClosingReport>> {
        let conn = self.conn()?;

        let json: Option<String> = conn
            .query_row(
                "SELECT report_json FROM closing_reports WHERE business_day = ?",
                [day_key(day)],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    fn closing_reports_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<ClosingReport>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT report_json FROM closing_reports
            WHERE business_day >= ? AND business_day <= ?
            ORDER BY business_day ASC
            "#,
        )?;

        let rows = stmt.query_map([day_key(from), day_key(to)], |row| row.get::<_, String>(0))?;

        let mut reports = Vec::new();
        for row in rows {
            reports.push(serde_json::from_str(&row?)?);
        }
        Ok(reports)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AuditEventType, tables};
    use spadesk_api::DashboardStats;
    use spadesk_util::Money;

    fn report(day: NaiveDate, revenue: i64) -> ClosingReport {
        ClosingReport {
            business_day: day,
            closed_at: spadesk_util::now(),
            totals: DashboardStats {
                total_revenue: Money::major(revenue),
                ..Default::default()
            },
            cancelled_sessions: 0,
            no_show_sessions: 0,
            therapists: vec![],
            services: vec![],
            walk_outs: vec![],
            unfinished_sessions: 0,
        }
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::new(AuditEventType::DaemonStarted))
            .unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::DaemonStopped))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event, AuditEventType::DaemonStopped));
    }

    #[test]
    fn test_outbox_lifecycle() {
        let store = SqliteStore::in_memory().unwrap();

        let first = store
            .enqueue_intent(&RemoteIntent::insert(
                tables::WALK_OUTS,
                "w1",
                serde_json::json!({"id": "w1", "reason": "no_rooms"}),
            ))
            .unwrap();
        let second = store
            .enqueue_intent(&RemoteIntent::update(
                tables::ROOMS,
                "room-1",
                serde_json::json!({"status": "occupied"}),
            ))
            .unwrap();
        assert_eq!(store.pending_intent_count().unwrap(), 2);

        store.mark_intent_failed(first, "connection refused").unwrap();
        let pending = store.pending_intents(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("connection refused"));
        assert_eq!(pending[1].operation, IntentOp::Update);

        store.mark_intent_synced(first).unwrap();
        store.mark_intent_synced(second).unwrap();
        assert_eq!(store.pending_intent_count().unwrap(), 0);
        assert!(matches!(
            store.mark_intent_synced(999),
            Err(StoreError::NotFound(_))
        ));

        assert_eq!(store.prune_synced_intents().unwrap(), 2);
        assert_eq!(store.prune_synced_intents().unwrap(), 0);
    }

    #[test]
    fn test_parked_intents_leave_the_queue() {
        let store = SqliteStore::in_memory().unwrap();

        let stuck: Vec<i64> = (0..3)
            .map(|n| {
                store
                    .enqueue_intent(&RemoteIntent::update(
                        tables::SESSIONS,
                        format!("missing-{}", n),
                        serde_json::json!({"status": "completed"}),
                    ))
                    .unwrap()
            })
            .collect();
        let healthy = store
            .enqueue_intent(&RemoteIntent::insert(
                tables::WALK_OUTS,
                "w1",
                serde_json::json!({"id": "w1"}),
            ))
            .unwrap();

        for id in &stuck {
            for _ in 0..MAX_INTENT_ATTEMPTS {
                store.mark_intent_failed(*id, "row not found").unwrap();
            }
        }

        // A batch as small as the parked backlog still reaches later writes
        let pending = store.pending_intents(3).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, healthy);
        assert_eq!(store.pending_intent_count().unwrap(), 1);
        assert_eq!(store.parked_intent_count().unwrap(), 3);

        // Parked rows are kept, only acknowledged ones are pruned
        store.mark_intent_synced(healthy).unwrap();
        assert_eq!(store.prune_synced_intents().unwrap(), 1);
        assert_eq!(store.parked_intent_count().unwrap(), 3);
    }

    #[test]
    fn test_entity_cache() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .cache_put(tables::ROOMS, "b", &serde_json::json!({"id": "b"}))
            .unwrap();
        store
            .cache_put(tables::ROOMS, "a", &serde_json::json!({"id": "a"}))
            .unwrap();
        store
            .cache_put(tables::ROOMS, "a", &serde_json::json!({"id": "a", "v": 2}))
            .unwrap();

        let rows = store.cache_list(tables::ROOMS).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["v"], 2);

        store.cache_remove(tables::ROOMS, "b").unwrap();
        assert_eq!(store.cache_list(tables::ROOMS).unwrap().len(), 1);

        store
            .cache_replace(
                tables::ROOMS,
                &[("c".into(), serde_json::json!({"id": "c"}))],
            )
            .unwrap();
        let rows = store.cache_list(tables::ROOMS).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "c");
        assert!(store.cache_list(tables::SESSIONS).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.load_snapshot().unwrap().is_none());

        let now = spadesk_util::now();
        let snapshot = DeskSnapshot {
            saved_at: now,
            business_day: now.date_naive(),
            therapists: vec![spadesk_api::Therapist::new("mai", "Mai")],
            rooms: vec![],
            services: vec![],
            sessions: vec![],
            walk_outs: vec![],
            unqueued: vec![],
        };
        store.save_snapshot(&snapshot).unwrap();

        let loaded = store.load_snapshot().unwrap().unwrap();
        assert_eq!(loaded.therapists.len(), 1);
        assert_eq!(loaded.business_day, now.date_naive());
    }

    #[test]
    fn test_closing_reports() {
        let store = SqliteStore::in_memory().unwrap();
        let d = |day| NaiveDate::from_ymd_opt(2025, 3, day).unwrap();

        store.save_closing_report(&report(d(1), 100)).unwrap();
        store.save_closing_report(&report(d(3), 300)).unwrap();
        store.save_closing_report(&report(d(2), 200)).unwrap();
        // Re-closing a day replaces the report
        store.save_closing_report(&report(d(2), 250)).unwrap();

        let day2 = store.closing_report(d(2)).unwrap().unwrap();
        assert_eq!(day2.totals.total_revenue, Money::major(250));
        assert!(store.closing_report(d(9)).unwrap().is_none());

        let range = store.closing_reports_between(d(2), d(3)).unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].business_day, d(2));
        assert_eq!(range[1].business_day, d(3));
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("spadesk.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .enqueue_intent(&RemoteIntent::delete(tables::EXPENSES, "e1"))
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let pending = store.pending_intents(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload, serde_json::Value::Null);
    }
}
