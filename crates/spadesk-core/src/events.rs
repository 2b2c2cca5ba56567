//! Core events emitted by the engine

use chrono::{DateTime, Local, NaiveDate};
use spadesk_api::{
    CompletionSource, DashboardStats, EventPayload, RoomStatus, SessionStatus, TherapistStatus,
    WalkOutReason,
};
use spadesk_util::{Money, RoomId, SessionId, TherapistId, WalkOutId};

/// Events emitted by the core engine
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
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

    /// Cancelled or no-show
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

    /// Stats after a mutation
    StatsChanged(DashboardStats),

    UndoApplied {
        description: String,
        remote_not_reverted: bool,
    },

    DayClosed {
        business_day: NaiveDate,
        total_revenue: Money,
    },
}

impl From<CoreEvent> for EventPayload {
    fn from(event: CoreEvent) -> Self {
        match event {
            CoreEvent::TherapistStatusChanged {
                therapist_id,
                status,
            } => EventPayload::TherapistStatusChanged {
                therapist_id,
                status,
            },
            CoreEvent::SessionBooked {
                session_id,
                room_id,
                therapist_ids,
            } => EventPayload::SessionBooked {
                session_id,
                room_id,
                therapist_ids,
            },
            CoreEvent::SessionStarted {
                session_id,
                room_id,
                ends_at,
            } => EventPayload::SessionStarted {
                session_id,
                room_id,
                ends_at,
            },
            CoreEvent::SessionCompleted {
                session_id,
                source,
                total_price,
            } => EventPayload::SessionCompleted {
                session_id,
                source,
                total_price,
            },
            CoreEvent::SessionClosed { session_id, status } => {
                EventPayload::SessionClosed { session_id, status }
            }
            CoreEvent::RoomStatusChanged { room_id, status } => {
                EventPayload::RoomStatusChanged { room_id, status }
            }
            CoreEvent::WalkOutRecorded {
                walk_out_id,
                reason,
                customers,
            } => EventPayload::WalkOutRecorded {
                walk_out_id,
                reason,
                customers,
            },
            CoreEvent::ExpensesChanged {
                therapist_id,
                total_expenses,
            } => EventPayload::ExpensesChanged {
                therapist_id,
                total_expenses,
            },
            CoreEvent::StatsChanged(stats) => EventPayload::StatsChanged(stats),
            CoreEvent::UndoApplied {
                description,
                remote_not_reverted,
            } => EventPayload::UndoApplied {
                description,
                remote_not_reverted,
            },
            CoreEvent::DayClosed {
                business_day,
                total_revenue,
            } => EventPayload::DayClosed {
                business_day,
                total_revenue,
            },
        }
    }
}
