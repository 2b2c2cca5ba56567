//! Shared request payloads and state views for the spadesk API

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use spadesk_util::{Money, RoomId, ServiceId, TherapistId};
use std::time::Duration;

use crate::{DashboardStats, Room, Service, Session, Therapist, WalkOut, WalkOutReason};

/// Output of the booking wizard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub service_id: ServiceId,
    pub therapist_ids: Vec<TherapistId>,
    pub room_id: RoomId,
    #[serde(default)]
    pub discount: Money,
    /// Start the session immediately instead of leaving it scheduled
    #[serde(default)]
    pub start_now: bool,
    /// Begin with an unbilled prep phase (only with `start_now`)
    #[serde(default)]
    pub with_prep: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Walk-out entry from the desk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkOutRequest {
    pub reason: WalkOutReason,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub therapist_ids: Vec<TherapistId>,
    #[serde(default)]
    pub service_id: Option<ServiceId>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// What ended a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    /// Desk pressed "Complete"
    Manual,
    /// Countdown reached zero
    Timer,
    /// Attendance sweep found the session overdue
    Sweep,
}

/// A running session as shown on the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSessionView {
    pub session: Session,
    pub remaining: Duration,
    pub in_prep: bool,
}

/// Therapist row with derived working time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TherapistView {
    pub therapist: Therapist,
    pub working_time: Duration,
}

/// Full desk state snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeskStateSnapshot {
    pub api_version: u32,
    pub generated_at: DateTime<Local>,
    pub therapists: Vec<TherapistView>,
    pub rooms: Vec<Room>,
    pub services: Vec<Service>,
    pub sessions: Vec<Session>,
    pub active_sessions: Vec<ActiveSessionView>,
    pub walk_outs: Vec<WalkOut>,
    pub stats: DashboardStats,
    pub undo: Option<UndoPreview>,
    pub pending_sync: usize,
}

/// Top of the undo stack, shown before the user confirms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoPreview {
    pub description: String,
    /// The original action already reached the hosted database; undo only
    /// reverts local state
    pub modifies_remote: bool,
    pub recorded_at: DateTime<Local>,
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub remaining: usize,
    /// Intents that gave up after repeated failures
    #[serde(default)]
    pub parked: usize,
}

/// Role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Owner/manager: closing, undo of synced actions, roster edits
    Manager,
    /// Front desk: bookings, attendance, walk-outs, expenses
    Reception,
    /// Read-only wall display
    Observer,
}

impl ClientRole {
    pub fn can_operate(&self) -> bool {
        matches!(self, ClientRole::Manager | ClientRole::Reception)
    }

    pub fn can_close_day(&self) -> bool {
        matches!(self, ClientRole::Manager)
    }

    pub fn can_undo_remote(&self) -> bool {
        matches!(self, ClientRole::Manager)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub store_ok: bool,
    pub remote_ok: bool,
    pub online: bool,
    pub pending_sync: usize,
}
