//! Command types for the spadeskd protocol

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use spadesk_util::{
    AppError, ClientId, ErrorKind, ErrorSeverity, ExpenseId, Money, RoomId, SessionId, TherapistId,
};

use crate::{
    API_VERSION, BookingRequest, ClientRole, ClosingReport, DashboardStats, DeskStateSnapshot,
    ExpenseType, HealthStatus, MonthlyReport, Room, RoomStatus, Session, SyncReport, Therapist,
    UndoPreview, WalkOut, WalkOutRequest,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    pub api_version: u32,
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    pub api_version: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information, enough for a dashboard to render a toast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    pub severity: ErrorSeverity,
    #[serde(default)]
    pub retryable: bool,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: ErrorSeverity::Error,
            retryable: false,
        }
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }
}

impl From<&AppError> for ErrorInfo {
    fn from(err: &AppError) -> Self {
        let code = match err.kind {
            ErrorKind::Validation => ErrorCode::ValidationFailed,
            ErrorKind::BusinessRule => ErrorCode::BusinessRule,
            ErrorKind::Authentication => ErrorCode::PermissionDenied,
            ErrorKind::Network | ErrorKind::ExternalService => ErrorCode::RemoteUnavailable,
            ErrorKind::Database => ErrorCode::StoreError,
            ErrorKind::Unknown => ErrorCode::InternalError,
        };

        Self {
            code,
            message: err.message.clone(),
            severity: err.severity,
            retryable: err.is_retryable(),
        }
    }
}

impl From<AppError> for ErrorInfo {
    fn from(err: AppError) -> Self {
        Self::from(&err)
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    NotFound,
    ValidationFailed,
    BusinessRule,
    ConfirmationRequired,
    PermissionDenied,
    RemoteUnavailable,
    StoreError,
    InternalError,
}

/// All possible commands from dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Full desk state
    GetState,

    /// Live dashboard numbers
    GetStats,

    // Attendance
    CheckIn { therapist_id: TherapistId },
    Depart { therapist_id: TherapistId },

    // Sessions
    BookSession { booking: BookingRequest },
    StartPrep { session_id: SessionId },
    /// Start the billable timer (ends a prep phase if one is running)
    StartSession { session_id: SessionId },
    CompleteSession { session_id: SessionId },
    CancelSession {
        session_id: SessionId,
        #[serde(default)]
        reason: Option<String>,
    },
    MarkNoShow { session_id: SessionId },

    RecordWalkOut { walk_out: WalkOutRequest },

    // Expenses
    AddExpense {
        therapist_id: TherapistId,
        amount: Money,
        expense_type: ExpenseType,
        #[serde(default)]
        description: Option<String>,
    },
    RemoveExpense {
        therapist_id: TherapistId,
        expense_id: ExpenseId,
    },

    SetRoomStatus { room_id: RoomId, status: RoomStatus },

    /// Show what the next undo would revert
    PeekUndo,

    /// Revert the most recent undo-eligible action. Actions that already
    /// reached the hosted database need `confirm = true`.
    Undo {
        #[serde(default)]
        confirm: bool,
    },

    /// Closing report. `None` previews today's; a date returns the saved one.
    GetClosingReport {
        #[serde(default)]
        business_day: Option<NaiveDate>,
    },

    /// Compute, persist and return today's closing report
    CloseDay,

    GetMonthlyReport { year: i32, month: u32 },

    /// Drain the outbox now
    SyncNow,

    /// Reload roster, rooms and catalog from the hosted database
    Refresh,

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    UnsubscribeEvents,

    GetHealth,

    /// Ping for keepalive
    Ping,
}

impl Command {
    /// Commands that change desk state
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Command::GetState
                | Command::GetStats
                | Command::PeekUndo
                | Command::GetClosingReport { .. }
                | Command::GetMonthlyReport { .. }
                | Command::SubscribeEvents
                | Command::UnsubscribeEvents
                | Command::GetHealth
                | Command::Ping
        )
    }

    /// Coarse role check done before dispatch. Undo of remote-modifying
    /// actions is checked again once the stack top is known.
    pub fn allowed_for(&self, role: ClientRole) -> bool {
        match self {
            Command::CloseDay | Command::Refresh => role.can_close_day(),
            _ if self.is_mutating() => role.can_operate(),
            _ => true,
        }
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    State(DeskStateSnapshot),
    Stats(DashboardStats),
    Therapist(Therapist),
    Session(Session),
    WalkOut(WalkOut),
    Room(Room),
    UndoPreview {
        preview: Option<UndoPreview>,
    },
    Undone {
        description: String,
        /// The hosted database still holds the original change
        remote_not_reverted: bool,
    },
    ClosingReport(ClosingReport),
    MonthlyReport(MonthlyReport),
    Synced(SyncReport),
    Refreshed {
        therapists: usize,
        rooms: usize,
        services: usize,
    },
    Subscribed {
        client_id: ClientId,
    },
    Unsubscribed,
    Health(HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spadesk_util::ServiceId;

    #[test]
    fn request_serialization() {
        let req = Request::new(1, Command::GetState);
        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 1);
        assert!(matches!(parsed.command, Command::GetState));
    }

    #[test]
    fn booking_command_wire_format() {
        let json = r#"{
            "request_id": 7,
            "api_version": 1,
            "command": {
                "type": "book_session",
                "booking": {
                    "service_id": "thai-60",
                    "therapist_ids": ["mai"],
                    "room_id": "room-1",
                    "discount": 20000
                }
            }
        }"#;

        let req: Request = serde_json::from_str(json).unwrap();
        match req.command {
            Command::BookSession { booking } => {
                assert_eq!(booking.service_id, ServiceId::new("thai-60"));
                assert_eq!(booking.discount, Money::major(200));
                assert!(!booking.start_now);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn undo_defaults_to_unconfirmed() {
        let cmd: Command = serde_json::from_str(r#"{"type":"undo"}"#).unwrap();
        assert!(matches!(cmd, Command::Undo { confirm: false }));
    }

    #[test]
    fn observer_is_read_only() {
        assert!(Command::GetStats.allowed_for(ClientRole::Observer));
        assert!(!Command::SyncNow.allowed_for(ClientRole::Observer));
        assert!(
            !Command::CheckIn {
                therapist_id: TherapistId::new("mai")
            }
            .allowed_for(ClientRole::Observer)
        );
    }

    #[test]
    fn closing_needs_manager() {
        assert!(!Command::CloseDay.allowed_for(ClientRole::Reception));
        assert!(Command::CloseDay.allowed_for(ClientRole::Manager));
        assert!(Command::Undo { confirm: true }.allowed_for(ClientRole::Reception));
    }

    #[test]
    fn app_error_maps_to_error_info() {
        let info = ErrorInfo::from(AppError::network("connection reset"));
        assert_eq!(info.code, ErrorCode::RemoteUnavailable);
        assert!(info.retryable);

        let info = ErrorInfo::from(AppError::business("room occupied"));
        assert_eq!(info.code, ErrorCode::BusinessRule);
        assert_eq!(info.severity, ErrorSeverity::Warning);
        assert!(!info.retryable);
    }

    #[test]
    fn response_serialization() {
        let resp = Response::success(3, ResponsePayload::Stats(DashboardStats::default()));
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 3);
        assert!(matches!(
            parsed.result,
            ResponseResult::Ok(ResponsePayload::Stats(_))
        ));
    }
}
