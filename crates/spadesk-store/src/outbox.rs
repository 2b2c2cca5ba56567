//! Remote intents queued for the reconciler

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hosted table names
pub mod tables {
    pub const SESSIONS: &str = "sessions";
    pub const ROOMS: &str = "rooms";
    pub const THERAPISTS: &str = "therapists";
    pub const SERVICES: &str = "services";
    pub const WALK_OUTS: &str = "walk_outs";
    pub const EXPENSES: &str = "expenses";
}

/// Failed attempts after which an intent is parked. Parked intents are no
/// longer handed to the reconciler and stay in the outbox for inspection.
pub const MAX_INTENT_ATTEMPTS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentOp {
    Insert,
    Update,
    Delete,
}

impl IntentOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentOp::Insert => "insert",
            IntentOp::Update => "update",
            IntentOp::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(IntentOp::Insert),
            "update" => Some(IntentOp::Update),
            "delete" => Some(IntentOp::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for IntentOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write the hosted database has not acknowledged yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteIntent {
    /// Outbox row id, 0 until enqueued
    pub id: i64,
    pub table: String,
    pub operation: IntentOp,
    pub row_id: String,
    /// Full row for inserts, changed columns for updates, null for deletes
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Local>,
}

impl RemoteIntent {
    pub fn new(
        table: impl Into<String>,
        operation: IntentOp,
        row_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: 0,
            table: table.into(),
            operation,
            row_id: row_id.into(),
            payload,
            attempts: 0,
            last_error: None,
            created_at: spadesk_util::now(),
        }
    }

    pub fn insert(table: &str, row_id: impl Into<String>, row: serde_json::Value) -> Self {
        Self::new(table, IntentOp::Insert, row_id, row)
    }

    pub fn update(table: &str, row_id: impl Into<String>, patch: serde_json::Value) -> Self {
        Self::new(table, IntentOp::Update, row_id, patch)
    }

    pub fn delete(table: &str, row_id: impl Into<String>) -> Self {
        Self::new(table, IntentOp::Delete, row_id, serde_json::Value::Null)
    }
}
