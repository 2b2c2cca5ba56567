//! Event types for spadeskd -> dashboard streaming

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use spadesk_util::{ErrorSeverity, Money, RoomId, SessionId, TherapistId, WalkOutId};

use crate::{
    API_VERSION, CompletionSource, DashboardStats, DeskStateSnapshot, RoomStatus, SessionStatus,
    SyncReport, TherapistStatus, WalkOutReason,
};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: spadesk_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Full state snapshot (sent on subscribe and after undo)
    StateChanged(DeskStateSnapshot),

    TherapistStatusChanged {
        therapist_id: TherapistId,
        status: TherapistStatus,
    },

    SessionBooked {
        session_id: SessionId,
        room_id: RoomId,
        therapist_ids: Vec<TherapistId>,
    },

    /// Billable timer started
    SessionStarted {
        session_id: SessionId,
        room_id: RoomId,
        ends_at: DateTime<Local>,
    },

    SessionCompleted {
        session_id: SessionId,
        source: CompletionSource,
        total_price: Money,
    },

    /// Cancelled or marked no-show
    SessionClosed {
        session_id: SessionId,
        status: SessionStatus,
    },

    RoomStatusChanged {
        room_id: RoomId,
        status: RoomStatus,
    },

    WalkOutRecorded {
        walk_out_id: WalkOutId,
        reason: WalkOutReason,
        customers: u32,
    },

    ExpensesChanged {
        therapist_id: TherapistId,
        total_expenses: Money,
    },

    /// Recomputed after every mutation
    StatsChanged(DashboardStats),

    UndoApplied {
        description: String,
        remote_not_reverted: bool,
    },

    DayClosed {
        business_day: NaiveDate,
        total_revenue: Money,
    },

    SyncCompleted(SyncReport),

    SyncFailed {
        message: String,
        pending: usize,
    },

    /// Hosted database reachability changed
    ConnectivityChanged { online: bool },

    /// Something the desk should see as a toast
    Notice {
        severity: ErrorSeverity,
        message: String,
    },

    /// Service is shutting down
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization() {
        let event = Event::new(EventPayload::SessionCompleted {
            session_id: SessionId::new(),
            source: CompletionSource::Timer,
            total_price: Money::major(800),
        });

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.api_version, API_VERSION);
        if let EventPayload::SessionCompleted {
            source,
            total_price,
            ..
        } = parsed.payload
        {
            assert_eq!(source, CompletionSource::Timer);
            assert_eq!(total_price, Money::major(800));
        } else {
            panic!("Expected SessionCompleted");
        }
    }

    #[test]
    fn payload_is_tagged() {
        let value =
            serde_json::to_value(EventPayload::ConnectivityChanged { online: false }).unwrap();
        assert_eq!(value["type"], "connectivity_changed");
        assert_eq!(value["online"], false);
    }
}
