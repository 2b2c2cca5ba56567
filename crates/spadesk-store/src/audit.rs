//! Audit event types

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use spadesk_api::{CompletionSource, RoomStatus, SessionStatus, WalkOutReason};
use spadesk_util::{
    ExpenseId, Money, RoomId, ServiceId, SessionId, TherapistId, WalkOutId,
};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    DaemonStarted,

    DaemonStopped,

    /// Reference data loaded, from the hosted database, the cache or config
    CatalogLoaded {
        source: String,
        services: usize,
        rooms: usize,
        therapists: usize,
    },

    TherapistCheckedIn { therapist_id: TherapistId },

    TherapistDeparted { therapist_id: TherapistId },

    SessionBooked {
        session_id: SessionId,
        service_id: ServiceId,
        room_id: RoomId,
        therapist_ids: Vec<TherapistId>,
        total_price: Money,
    },

    SessionStarted { session_id: SessionId },

    SessionCompleted {
        session_id: SessionId,
        source: CompletionSource,
    },

    /// Cancelled or no-show
    SessionClosed {
        session_id: SessionId,
        status: SessionStatus,
    },

    WalkOutRecorded {
        walk_out_id: WalkOutId,
        reason: WalkOutReason,
        customers: u32,
    },

    ExpenseAdded {
        therapist_id: TherapistId,
        expense_id: ExpenseId,
        amount: Money,
    },

    ExpenseRemoved {
        therapist_id: TherapistId,
        expense_id: ExpenseId,
    },

    RoomStatusChanged { room_id: RoomId, status: RoomStatus },

    UndoApplied {
        description: String,
        modifies_remote: bool,
    },

    DayClosed {
        business_day: NaiveDate,
        total_revenue: Money,
    },

    SyncFinished { synced: usize, failed: usize },

    ClientConnected {
        client_id: String,
        role: String,
        uid: Option<u32>,
    },

    ClientDisconnected { client_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    pub timestamp: DateTime<Local>,

    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: spadesk_util::now(),
            event,
        }
    }
}
