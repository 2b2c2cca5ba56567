//! Desk state and the action reducer
//!
//! Every desk mutation goes through [`DeskState::apply`]. An action either
//! fails without touching state or applies completely, returning the events
//! to broadcast and the remote writes to queue. Desk-initiated actions also
//! push an undo entry holding the prior copies of everything they touch.

use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use serde_json::{Value, json};
use spadesk_api::{
    BookingRequest, CompletionSource, Expense, ExpenseType, MAX_WALK_OUT_COUNT, Room, RoomStatus,
    Service, Session, SessionStatus, Therapist, TherapistStatus, UndoPreview, WalkOut,
    WalkOutRequest,
};
use spadesk_config::Catalog;
use spadesk_store::{RemoteIntent, tables};
use spadesk_util::{
    AppError, ExpenseId, Money, Result, RoomId, ServiceId, SessionId, TherapistId, WalkOutId,
};
use tracing::debug;

use crate::{
    CoreEvent, EntityRef, UndoEntry, UndoOutcome, UndoStack, payout_shares, validate_booking,
};

/// Everything the desk can do to its state
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CheckIn {
        therapist_id: TherapistId,
    },
    Depart {
        therapist_id: TherapistId,
    },
    BookSession {
        session_id: SessionId,
        booking: BookingRequest,
    },
    StartPrep {
        session_id: SessionId,
    },
    /// Start the billable timer, ending a prep phase if one is running
    StartSession {
        session_id: SessionId,
    },
    /// Completing an already completed session is a no-op
    CompleteSession {
        session_id: SessionId,
        source: CompletionSource,
    },
    CancelSession {
        session_id: SessionId,
        reason: Option<String>,
    },
    MarkNoShow {
        session_id: SessionId,
    },
    RecordWalkOut {
        walk_out_id: WalkOutId,
        request: WalkOutRequest,
    },
    AddExpense {
        expense_id: ExpenseId,
        therapist_id: TherapistId,
        amount: Money,
        expense_type: ExpenseType,
        description: Option<String>,
    },
    RemoveExpense {
        therapist_id: TherapistId,
        expense_id: ExpenseId,
    },
    SetRoomStatus {
        room_id: RoomId,
        status: RoomStatus,
    },

    // Inverses recorded on the undo stack. Local only.
    RestoreTherapist(Therapist),
    /// Attendance fields only; earnings and expenses are left alone
    RestoreAttendance {
        therapist_id: TherapistId,
        status: TherapistStatus,
        check_in_at: Option<DateTime<Local>>,
        departed_at: Option<DateTime<Local>>,
    },
    RestoreExpense(Expense),
    DropExpense {
        therapist_id: TherapistId,
        expense_id: ExpenseId,
    },
    RestoreRoom(Room),
    RestoreSession(Session),
    RemoveSession(SessionId),
    RemoveWalkOut(WalkOutId),
}

impl Action {
    pub fn is_restore(&self) -> bool {
        matches!(
            self,
            Action::RestoreTherapist(_)
                | Action::RestoreAttendance { .. }
                | Action::RestoreExpense(_)
                | Action::DropExpense { .. }
                | Action::RestoreRoom(_)
                | Action::RestoreSession(_)
                | Action::RemoveSession(_)
                | Action::RemoveWalkOut(_)
        )
    }

    /// The entity a restore action overwrites
    pub(crate) fn restored_entity(&self) -> Option<EntityRef> {
        let entity = match self {
            Action::RestoreTherapist(t) => EntityRef::Therapist(t.id.clone()),
            Action::RestoreAttendance { therapist_id, .. } => {
                EntityRef::Therapist(therapist_id.clone())
            }
            Action::RestoreExpense(e) => EntityRef::Expense(e.id.clone()),
            Action::DropExpense { expense_id, .. } => EntityRef::Expense(expense_id.clone()),
            Action::RestoreRoom(r) => EntityRef::Room(r.id.clone()),
            Action::RestoreSession(s) => EntityRef::Session(s.id.clone()),
            Action::RemoveSession(id) => EntityRef::Session(id.clone()),
            Action::RemoveWalkOut(id) => EntityRef::WalkOut(id.clone()),
            _ => return None,
        };
        Some(entity)
    }
}

/// What a reduced action produced
#[derive(Debug, Default)]
pub struct Applied {
    pub events: Vec<CoreEvent>,
    /// Writes for the hosted database, in order
    pub intents: Vec<RemoteIntent>,
    /// Entry pushed onto the undo stack, if any
    pub undo: Option<UndoPreview>,
}

impl Applied {
    /// Nothing changed
    pub fn is_noop(&self) -> bool {
        self.events.is_empty() && self.intents.is_empty()
    }
}

/// The desk's view of one business day
#[derive(Debug, Clone)]
pub struct DeskState {
    pub business_day: NaiveDate,
    /// Ordered by roster position
    pub therapists: Vec<Therapist>,
    pub rooms: Vec<Room>,
    pub services: Vec<Service>,
    pub sessions: Vec<Session>,
    pub walk_outs: Vec<WalkOut>,
    pub undo: UndoStack,
}

impl DeskState {
    pub fn new(business_day: NaiveDate, undo_depth: usize) -> Self {
        Self {
            business_day,
            therapists: Vec::new(),
            rooms: Vec::new(),
            services: Vec::new(),
            sessions: Vec::new(),
            walk_outs: Vec::new(),
            undo: UndoStack::new(undo_depth),
        }
    }

    /// Empty day seeded with reference data
    pub fn from_catalog(catalog: &Catalog, business_day: NaiveDate, undo_depth: usize) -> Self {
        let mut state = Self::new(business_day, undo_depth);
        state.services = catalog.services.clone();
        state.rooms = catalog.rooms.clone();
        state.therapists = catalog.roster.clone();
        state.sort_roster();
        state
    }

    pub(crate) fn sort_roster(&mut self) {
        self.therapists.sort_by_key(|t| t.roster_position);
    }

    // Lookups

    pub fn therapist(&self, id: &TherapistId) -> Option<&Therapist> {
        self.therapists.iter().find(|t| &t.id == id)
    }

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| &r.id == id)
    }

    pub fn service(&self, id: &ServiceId) -> Option<&Service> {
        self.services.iter().find(|s| &s.id == id)
    }

    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| &s.id == id)
    }

    pub fn walk_out(&self, id: &WalkOutId) -> Option<&WalkOut> {
        self.walk_outs.iter().find(|w| &w.id == id)
    }

    /// Scheduled or in-progress session involving the therapist
    pub fn open_session_for_therapist(&self, id: &TherapistId) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| !s.status.is_terminal() && s.involves(id))
    }

    /// Scheduled or in-progress session booked into the room
    pub fn open_session_for_room(&self, id: &RoomId) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| !s.status.is_terminal() && &s.room_id == id)
    }

    pub fn active_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter().filter(|s| s.is_active())
    }

    fn therapist_mut(&mut self, id: &TherapistId) -> Result<&mut Therapist> {
        self.therapists
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| AppError::validation(format!("Unknown therapist: {}", id)))
    }

    fn room_mut(&mut self, id: &RoomId) -> Result<&mut Room> {
        self.rooms
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| AppError::validation(format!("Unknown room: {}", id)))
    }

    fn session_mut(&mut self, id: &SessionId) -> Result<&mut Session> {
        self.sessions
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| AppError::validation(format!("Unknown session: {}", id)))
    }

    fn require_session(&self, id: &SessionId) -> Result<&Session> {
        self.session(id)
            .ok_or_else(|| AppError::validation(format!("Unknown session: {}", id)))
    }

    /// Human readable label for undo previews
    pub fn describe(&self, action: &Action) -> String {
        let therapist_name = |id: &TherapistId| {
            self.therapist(id)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| id.to_string())
        };
        let session_label = |id: &SessionId| match self.session(id) {
            Some(s) => {
                let service = self
                    .service(&s.service_id)
                    .map(|x| x.name.clone())
                    .unwrap_or_else(|| s.service_id.to_string());
                let room = self
                    .room(&s.room_id)
                    .map(|r| r.name.clone())
                    .unwrap_or_else(|| s.room_id.to_string());
                format!("{} in {}", service, room)
            }
            None => format!("session {}", id),
        };

        match action {
            Action::CheckIn { therapist_id } => format!("Check in {}", therapist_name(therapist_id)),
            Action::Depart { therapist_id } => format!("Depart {}", therapist_name(therapist_id)),
            Action::BookSession { booking, .. } => {
                let service = self
                    .service(&booking.service_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| booking.service_id.to_string());
                let room = self
                    .room(&booking.room_id)
                    .map(|r| r.name.clone())
                    .unwrap_or_else(|| booking.room_id.to_string());
                format!("Book {} in {}", service, room)
            }
            Action::StartPrep { session_id } => format!("Start prep for {}", session_label(session_id)),
            Action::StartSession { session_id } => format!("Start {}", session_label(session_id)),
            Action::CompleteSession { session_id, .. } => {
                format!("Complete {}", session_label(session_id))
            }
            Action::CancelSession { session_id, .. } => {
                format!("Cancel {}", session_label(session_id))
            }
            Action::MarkNoShow { session_id } => {
                format!("Mark {} as no-show", session_label(session_id))
            }
            Action::RecordWalkOut { request, .. } => {
                format!("Record {} walk-out(s)", request.count.unwrap_or(1))
            }
            Action::AddExpense {
                therapist_id,
                amount,
                ..
            } => format!("Add {} expense for {}", amount, therapist_name(therapist_id)),
            Action::RemoveExpense { therapist_id, .. } => {
                format!("Remove expense from {}", therapist_name(therapist_id))
            }
            Action::SetRoomStatus { room_id, status } => {
                let room = self
                    .room(room_id)
                    .map(|r| r.name.clone())
                    .unwrap_or_else(|| room_id.to_string());
                format!("Set {} to {:?}", room, status)
            }
            _ => "Restore".into(),
        }
    }

    /// Prior copies of everything `action` touches, as restore actions
    fn inverse_of(&self, action: &Action) -> Vec<Action> {
        let restore_therapist =
            |id: &TherapistId| self.therapist(id).cloned().map(Action::RestoreTherapist);
        let restore_attendance = |id: &TherapistId| {
            self.therapist(id).map(|t| Action::RestoreAttendance {
                therapist_id: t.id.clone(),
                status: t.status,
                check_in_at: t.check_in_at,
                departed_at: t.departed_at,
            })
        };
        let restore_session_scope = |id: &SessionId| -> Vec<Action> {
            let Some(session) = self.session(id) else {
                return Vec::new();
            };
            let mut inverse = vec![Action::RestoreSession(session.clone())];
            inverse.extend(self.room(&session.room_id).cloned().map(Action::RestoreRoom));
            inverse.extend(session.therapist_ids.iter().filter_map(restore_therapist));
            inverse
        };

        match action {
            Action::CheckIn { therapist_id } | Action::Depart { therapist_id } => {
                restore_attendance(therapist_id).into_iter().collect()
            }
            Action::AddExpense {
                expense_id,
                therapist_id,
                ..
            } => vec![Action::DropExpense {
                therapist_id: therapist_id.clone(),
                expense_id: expense_id.clone(),
            }],
            Action::RemoveExpense {
                therapist_id,
                expense_id,
            } => self
                .therapist(therapist_id)
                .and_then(|t| t.expenses.iter().find(|e| &e.id == expense_id))
                .cloned()
                .map(Action::RestoreExpense)
                .into_iter()
                .collect(),
            Action::BookSession {
                session_id,
                booking,
            } => {
                let mut inverse = vec![Action::RemoveSession(session_id.clone())];
                inverse.extend(self.room(&booking.room_id).cloned().map(Action::RestoreRoom));
                inverse.extend(booking.therapist_ids.iter().filter_map(restore_therapist));
                inverse
            }
            Action::StartPrep { session_id }
            | Action::StartSession { session_id }
            | Action::CompleteSession { session_id, .. }
            | Action::CancelSession { session_id, .. }
            | Action::MarkNoShow { session_id } => restore_session_scope(session_id),
            Action::RecordWalkOut { walk_out_id, .. } => {
                vec![Action::RemoveWalkOut(walk_out_id.clone())]
            }
            Action::SetRoomStatus { room_id, .. } => {
                self.room(room_id).cloned().map(Action::RestoreRoom).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Apply an action. With `record_undo`, a successful change is pushed
    /// onto the undo stack. Without it, undo entries holding earlier copies
    /// of anything the action changed are discarded.
    pub fn apply(
        &mut self,
        action: Action,
        now: DateTime<Local>,
        record_undo: bool,
    ) -> Result<Applied> {
        if action.is_restore() {
            return self.reduce(action, now);
        }

        let description = record_undo.then(|| self.describe(&action));
        let inverse = self.inverse_of(&action);

        let mut applied = self.reduce(action, now)?;
        if applied.is_noop() {
            return Ok(applied);
        }

        match description {
            Some(description) => {
                let entry = UndoEntry::new(description, !applied.intents.is_empty(), now, inverse);
                applied.undo = Some(entry.preview());
                self.undo.push(entry);
            }
            None => {
                let touched: Vec<EntityRef> =
                    inverse.iter().filter_map(Action::restored_entity).collect();
                let dropped = self.undo.discard_touching(&touched);
                if dropped > 0 {
                    debug!(dropped, "Undo entries invalidated by automatic change");
                }
            }
        }

        Ok(applied)
    }

    /// Revert the most recent undo entry. Entries whose action queued remote
    /// writes need `confirm`; the reversal is applied locally only.
    pub fn undo(&mut self, confirm: bool, now: DateTime<Local>) -> Result<UndoOutcome> {
        let Some(top) = self.undo.peek() else {
            return Ok(UndoOutcome::Empty);
        };

        if top.modifies_remote && !confirm {
            return Ok(UndoOutcome::NeedsConfirmation(top));
        }

        let Some(entry) = self.undo.pop() else {
            return Ok(UndoOutcome::Empty);
        };

        for action in entry.inverse {
            self.reduce(action, now)?;
        }

        Ok(UndoOutcome::Applied {
            description: entry.description,
            remote_not_reverted: entry.modifies_remote,
        })
    }

    fn reduce(&mut self, action: Action, now: DateTime<Local>) -> Result<Applied> {
        match action {
            Action::CheckIn { therapist_id } => self.check_in(&therapist_id, now),
            Action::Depart { therapist_id } => self.depart(&therapist_id, now),
            Action::BookSession {
                session_id,
                booking,
            } => self.book_session(session_id, booking, now),
            Action::StartPrep { session_id } => self.start_session(&session_id, true, now),
            Action::StartSession { session_id } => self.start_session(&session_id, false, now),
            Action::CompleteSession { session_id, source } => {
                self.complete_session(&session_id, source, now)
            }
            Action::CancelSession { session_id, reason } => {
                self.cancel_session(&session_id, reason, now)
            }
            Action::MarkNoShow { session_id } => self.mark_no_show(&session_id, now),
            Action::RecordWalkOut {
                walk_out_id,
                request,
            } => self.record_walk_out(walk_out_id, request, now),
            Action::AddExpense {
                expense_id,
                therapist_id,
                amount,
                expense_type,
                description,
            } => self.add_expense(expense_id, &therapist_id, amount, expense_type, description, now),
            Action::RemoveExpense {
                therapist_id,
                expense_id,
            } => self.remove_expense(&therapist_id, &expense_id),
            Action::SetRoomStatus { room_id, status } => self.set_room_status(&room_id, status),
            Action::RestoreTherapist(therapist) => {
                match self.therapists.iter_mut().find(|t| t.id == therapist.id) {
                    Some(slot) => *slot = therapist,
                    None => {
                        self.therapists.push(therapist);
                        self.sort_roster();
                    }
                }
                Ok(Applied::default())
            }
            Action::RestoreAttendance {
                therapist_id,
                status,
                check_in_at,
                departed_at,
            } => {
                if let Some(therapist) = self.therapists.iter_mut().find(|t| t.id == therapist_id) {
                    therapist.status = status;
                    therapist.check_in_at = check_in_at;
                    therapist.departed_at = departed_at;
                }
                Ok(Applied::default())
            }
            Action::RestoreExpense(expense) => {
                if let Some(therapist) =
                    self.therapists.iter_mut().find(|t| t.id == expense.therapist_id)
                    && !therapist.expenses.iter().any(|e| e.id == expense.id)
                {
                    therapist.expenses.push(expense);
                    therapist.expenses.sort_by_key(|e| e.created_at);
                }
                Ok(Applied::default())
            }
            Action::DropExpense {
                therapist_id,
                expense_id,
            } => {
                if let Some(therapist) = self.therapists.iter_mut().find(|t| t.id == therapist_id) {
                    therapist.expenses.retain(|e| e.id != expense_id);
                }
                Ok(Applied::default())
            }
            Action::RestoreRoom(room) => {
                match self.rooms.iter_mut().find(|r| r.id == room.id) {
                    Some(slot) => *slot = room,
                    None => self.rooms.push(room),
                }
                Ok(Applied::default())
            }
            Action::RestoreSession(session) => {
                match self.sessions.iter_mut().find(|s| s.id == session.id) {
                    Some(slot) => *slot = session,
                    None => self.sessions.push(session),
                }
                Ok(Applied::default())
            }
            Action::RemoveSession(id) => {
                self.sessions.retain(|s| s.id != id);
                Ok(Applied::default())
            }
            Action::RemoveWalkOut(id) => {
                self.walk_outs.retain(|w| w.id != id);
                Ok(Applied::default())
            }
        }
    }

    // Attendance

    fn check_in(&mut self, id: &TherapistId, now: DateTime<Local>) -> Result<Applied> {
        let therapist = self.therapist_mut(id)?;
        if therapist.status.is_on_duty() {
            return Err(AppError::business(format!(
                "{} is already checked in",
                therapist.name
            )));
        }

        therapist.status = TherapistStatus::Available;
        therapist.check_in_at = Some(now);
        therapist.departed_at = None;

        Ok(Applied {
            events: vec![CoreEvent::TherapistStatusChanged {
                therapist_id: id.clone(),
                status: TherapistStatus::Available,
            }],
            intents: vec![therapist_intent(therapist)],
            undo: None,
        })
    }

    fn depart(&mut self, id: &TherapistId, now: DateTime<Local>) -> Result<Applied> {
        let has_booking = self.open_session_for_therapist(id).is_some();
        let therapist = self.therapist_mut(id)?;

        match therapist.status {
            TherapistStatus::Inactive | TherapistStatus::Departed => {
                return Err(AppError::business(format!(
                    "{} is not checked in",
                    therapist.name
                )));
            }
            TherapistStatus::InSession => {
                return Err(AppError::business(format!(
                    "{} is in a session",
                    therapist.name
                )));
            }
            TherapistStatus::Available if has_booking => {
                return Err(AppError::business(format!(
                    "{} has a booked session",
                    therapist.name
                )));
            }
            TherapistStatus::Available => {}
        }

        therapist.status = TherapistStatus::Departed;
        therapist.departed_at = Some(now);

        Ok(Applied {
            events: vec![CoreEvent::TherapistStatusChanged {
                therapist_id: id.clone(),
                status: TherapistStatus::Departed,
            }],
            intents: vec![therapist_intent(therapist)],
            undo: None,
        })
    }

    // Sessions

    fn book_session(
        &mut self,
        session_id: SessionId,
        booking: BookingRequest,
        now: DateTime<Local>,
    ) -> Result<Applied> {
        if self.session(&session_id).is_some() {
            return Err(AppError::validation(format!(
                "Session {} already exists",
                session_id
            )));
        }

        let quote = validate_booking(self, &booking)?;
        let session = Session {
            id: session_id.clone(),
            therapist_ids: booking.therapist_ids.clone(),
            service_id: booking.service_id.clone(),
            room_id: booking.room_id.clone(),
            status: SessionStatus::Scheduled,
            discount: booking.discount,
            total_price: quote.total_price,
            lady_payout: quote.lady_payout,
            shop_revenue: quote.shop_revenue,
            duration_minutes: quote.duration_minutes,
            created_at: now,
            start_time: None,
            end_time: None,
            prep_started_at: None,
            is_in_prep_phase: false,
            notes: booking.notes.clone(),
        };

        let mut applied = Applied {
            events: vec![CoreEvent::SessionBooked {
                session_id: session_id.clone(),
                room_id: session.room_id.clone(),
                therapist_ids: session.therapist_ids.clone(),
            }],
            ..Default::default()
        };
        self.sessions.push(session);

        if booking.start_now {
            let mut started = self.begin(&session_id, booking.with_prep, now)?;
            applied.events.append(&mut started.events);
            applied.intents.append(&mut started.intents);
        }

        // The insert carries the final row, ahead of the room and therapist
        // updates it caused
        let session = self.require_session(&session_id)?;
        applied
            .intents
            .insert(0, RemoteIntent::insert(tables::SESSIONS, session_id.to_string(), to_row(session)?));

        debug!(session_id = %session_id, start_now = booking.start_now, "Session booked");
        Ok(applied)
    }

    fn start_session(
        &mut self,
        id: &SessionId,
        prep: bool,
        now: DateTime<Local>,
    ) -> Result<Applied> {
        let session = self.require_session(id)?;
        let mut applied = match (session.status, session.is_in_prep_phase, prep) {
            (SessionStatus::Scheduled, _, _) => self.begin(id, prep, now)?,
            (SessionStatus::InProgress, true, false) => {
                let session = self.session_mut(id)?;
                session.is_in_prep_phase = false;
                session.start_time = Some(now);
                Applied {
                    events: vec![started_event(session, now)],
                    ..Default::default()
                }
            }
            (SessionStatus::InProgress, _, _) => {
                return Err(AppError::business("Session has already started"));
            }
            (status, _, _) => {
                return Err(AppError::business(format!(
                    "Session is already {:?}",
                    status
                )));
            }
        };

        let session = self.require_session(id)?;
        applied.intents.insert(0, session_intent(session)?);
        Ok(applied)
    }

    /// Move a scheduled session to in progress, occupying its room and
    /// therapists. Does not queue the session row.
    fn begin(&mut self, id: &SessionId, prep: bool, now: DateTime<Local>) -> Result<Applied> {
        let session = self.require_session(id)?.clone();
        let mut applied = Applied::default();

        let room = self
            .room(&session.room_id)
            .ok_or_else(|| AppError::validation(format!("Unknown room: {}", session.room_id)))?;
        if !room.is_available() {
            return Err(AppError::business(format!("{} is not available", room.name)));
        }
        for therapist_id in &session.therapist_ids {
            let therapist = self.therapist(therapist_id).ok_or_else(|| {
                AppError::validation(format!("Unknown therapist: {}", therapist_id))
            })?;
            if therapist.status != TherapistStatus::Available {
                return Err(AppError::business(format!(
                    "{} is not available",
                    therapist.name
                )));
            }
        }

        let room = self.room_mut(&session.room_id)?;
        room.status = RoomStatus::Occupied;
        applied.intents.push(room_intent(room));
        applied.events.push(CoreEvent::RoomStatusChanged {
            room_id: room.id.clone(),
            status: RoomStatus::Occupied,
        });

        for therapist_id in &session.therapist_ids {
            let therapist = self.therapist_mut(therapist_id)?;
            therapist.status = TherapistStatus::InSession;
            applied.intents.push(therapist_intent(therapist));
            applied.events.push(CoreEvent::TherapistStatusChanged {
                therapist_id: therapist_id.clone(),
                status: TherapistStatus::InSession,
            });
        }

        let session = self.session_mut(id)?;
        session.status = SessionStatus::InProgress;
        if prep {
            session.is_in_prep_phase = true;
            session.prep_started_at = Some(now);
        } else {
            session.is_in_prep_phase = false;
            session.start_time = Some(now);
            applied.events.push(started_event(session, now));
        }

        Ok(applied)
    }

    fn complete_session(
        &mut self,
        id: &SessionId,
        source: CompletionSource,
        now: DateTime<Local>,
    ) -> Result<Applied> {
        let session = self.require_session(id)?;
        match session.status {
            SessionStatus::InProgress => {}
            SessionStatus::Completed => {
                debug!(session_id = %id, source = ?source, "Session already completed");
                return Ok(Applied::default());
            }
            SessionStatus::Scheduled => {
                return Err(AppError::business("Session has not started"));
            }
            status => {
                return Err(AppError::business(format!(
                    "Session is already {:?}",
                    status
                )));
            }
        }

        let session = self.session_mut(id)?;
        session.status = SessionStatus::Completed;
        session.end_time = Some(now);
        if session.start_time.is_none() {
            session.start_time = session.prep_started_at.or(Some(now));
        }
        session.is_in_prep_phase = false;
        let session = session.clone();

        let mut applied = Applied {
            events: vec![CoreEvent::SessionCompleted {
                session_id: id.clone(),
                source,
                total_price: session.total_price,
            }],
            intents: vec![session_intent(&session)?],
            undo: None,
        };
        self.release(&session, true, &mut applied);

        Ok(applied)
    }

    fn cancel_session(
        &mut self,
        id: &SessionId,
        reason: Option<String>,
        now: DateTime<Local>,
    ) -> Result<Applied> {
        let session = self.require_session(id)?;
        let was_running = match session.status {
            SessionStatus::Scheduled => false,
            SessionStatus::InProgress => true,
            status => {
                return Err(AppError::business(format!(
                    "Session is already {:?}",
                    status
                )));
            }
        };

        let session = self.session_mut(id)?;
        session.status = SessionStatus::Cancelled;
        session.end_time = Some(now);
        session.is_in_prep_phase = false;
        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            session.notes = Some(match session.notes.take() {
                Some(notes) => format!("{}\nCancelled: {}", notes, reason),
                None => format!("Cancelled: {}", reason),
            });
        }
        let session = session.clone();

        let mut applied = Applied {
            events: vec![CoreEvent::SessionClosed {
                session_id: id.clone(),
                status: SessionStatus::Cancelled,
            }],
            intents: vec![session_intent(&session)?],
            undo: None,
        };
        if was_running {
            self.release(&session, false, &mut applied);
        }

        Ok(applied)
    }

    fn mark_no_show(&mut self, id: &SessionId, now: DateTime<Local>) -> Result<Applied> {
        let session = self.require_session(id)?;
        match session.status {
            SessionStatus::Scheduled => {}
            SessionStatus::InProgress => {
                return Err(AppError::business("Session has already started"));
            }
            status => {
                return Err(AppError::business(format!(
                    "Session is already {:?}",
                    status
                )));
            }
        }

        let session = self.session_mut(id)?;
        session.status = SessionStatus::NoShow;
        session.end_time = Some(now);

        Ok(Applied {
            events: vec![CoreEvent::SessionClosed {
                session_id: id.clone(),
                status: SessionStatus::NoShow,
            }],
            intents: vec![session_intent(session)?],
            undo: None,
        })
    }

    /// Free the room and therapists of a session that stopped running.
    /// With `credit`, therapists are paid their share.
    fn release(&mut self, session: &Session, credit: bool, applied: &mut Applied) {
        let shares = if credit {
            payout_shares(session)
        } else {
            Vec::new()
        };

        for therapist_id in &session.therapist_ids {
            let Some(therapist) = self.therapists.iter_mut().find(|t| &t.id == therapist_id)
            else {
                continue;
            };

            let mut changed = false;
            if therapist.status == TherapistStatus::InSession {
                therapist.status = TherapistStatus::Available;
                applied.events.push(CoreEvent::TherapistStatusChanged {
                    therapist_id: therapist_id.clone(),
                    status: TherapistStatus::Available,
                });
                changed = true;
            }
            if let Some((_, share)) = shares.iter().find(|(id, _)| id == therapist_id) {
                therapist.total_earnings += *share;
                therapist.session_count += 1;
                changed = true;
            }
            if changed {
                applied.intents.push(therapist_intent(therapist));
            }
        }

        let still_used = self
            .sessions
            .iter()
            .any(|s| s.id != session.id && s.is_active() && s.room_id == session.room_id);
        if still_used {
            return;
        }
        if let Some(room) = self.rooms.iter_mut().find(|r| r.id == session.room_id)
            && room.status == RoomStatus::Occupied
        {
            room.status = RoomStatus::Available;
            applied.intents.push(room_intent(room));
            applied.events.push(CoreEvent::RoomStatusChanged {
                room_id: room.id.clone(),
                status: RoomStatus::Available,
            });
        }
    }

    // Walk-outs and expenses

    fn record_walk_out(
        &mut self,
        id: WalkOutId,
        request: WalkOutRequest,
        now: DateTime<Local>,
    ) -> Result<Applied> {
        match request.count {
            Some(0) => return Err(AppError::validation("Walk-out count must be at least 1")),
            Some(n) if n > MAX_WALK_OUT_COUNT => {
                return Err(AppError::validation(format!(
                    "Walk-out count must be at most {}",
                    MAX_WALK_OUT_COUNT
                )));
            }
            _ => {}
        }
        if self.walk_out(&id).is_some() {
            return Err(AppError::validation(format!("Walk-out {} already exists", id)));
        }
        for therapist_id in &request.therapist_ids {
            if self.therapist(therapist_id).is_none() {
                return Err(AppError::validation(format!(
                    "Unknown therapist: {}",
                    therapist_id
                )));
            }
        }
        if let Some(service_id) = &request.service_id
            && self.service(service_id).is_none()
        {
            return Err(AppError::validation(format!("Unknown service: {}", service_id)));
        }

        let walk_out = WalkOut {
            id: id.clone(),
            reason: request.reason,
            count: request.count,
            therapist_ids: request.therapist_ids,
            service_id: request.service_id,
            notes: request.notes,
            created_at: now,
        };

        let applied = Applied {
            events: vec![CoreEvent::WalkOutRecorded {
                walk_out_id: id.clone(),
                reason: walk_out.reason,
                customers: walk_out.customers(),
            }],
            intents: vec![RemoteIntent::insert(
                tables::WALK_OUTS,
                id.to_string(),
                to_row(&walk_out)?,
            )],
            undo: None,
        };
        self.walk_outs.push(walk_out);
        Ok(applied)
    }

    /// Expenses stay on the desk; the hosted therapists table does not
    /// carry them.
    fn add_expense(
        &mut self,
        expense_id: ExpenseId,
        therapist_id: &TherapistId,
        amount: Money,
        expense_type: ExpenseType,
        description: Option<String>,
        now: DateTime<Local>,
    ) -> Result<Applied> {
        if amount <= Money::ZERO {
            return Err(AppError::validation("Expense amount must be positive"));
        }

        let therapist = self.therapist_mut(therapist_id)?;
        if therapist.expenses.iter().any(|e| e.id == expense_id) {
            return Err(AppError::validation(format!(
                "Expense {} already exists",
                expense_id
            )));
        }

        therapist.expenses.push(Expense {
            id: expense_id,
            therapist_id: therapist_id.clone(),
            amount,
            expense_type,
            description,
            created_at: now,
        });

        Ok(Applied {
            events: vec![CoreEvent::ExpensesChanged {
                therapist_id: therapist_id.clone(),
                total_expenses: therapist.total_expenses(),
            }],
            ..Default::default()
        })
    }

    fn remove_expense(&mut self, therapist_id: &TherapistId, expense_id: &ExpenseId) -> Result<Applied> {
        let therapist = self.therapist_mut(therapist_id)?;
        let before = therapist.expenses.len();
        therapist.expenses.retain(|e| &e.id != expense_id);
        if therapist.expenses.len() == before {
            return Err(AppError::validation(format!(
                "Unknown expense: {}",
                expense_id
            )));
        }

        Ok(Applied {
            events: vec![CoreEvent::ExpensesChanged {
                therapist_id: therapist_id.clone(),
                total_expenses: therapist.total_expenses(),
            }],
            ..Default::default()
        })
    }

    // Rooms

    fn set_room_status(&mut self, room_id: &RoomId, status: RoomStatus) -> Result<Applied> {
        let in_use = self
            .sessions
            .iter()
            .any(|s| s.is_active() && &s.room_id == room_id);
        let room = self.room_mut(room_id)?;

        if room.status == status {
            return Ok(Applied::default());
        }
        if in_use {
            return Err(AppError::business(format!(
                "{} has a session in progress",
                room.name
            )));
        }

        room.status = status;
        Ok(Applied {
            events: vec![CoreEvent::RoomStatusChanged {
                room_id: room_id.clone(),
                status,
            }],
            intents: vec![room_intent(room)],
            undo: None,
        })
    }

    /// Reset for the next business day. Roster members go back to inactive
    /// with cleared earnings; occupied rooms are freed.
    pub fn start_new_day(&mut self, business_day: NaiveDate) -> Vec<RemoteIntent> {
        let mut intents = Vec::new();

        for therapist in &mut self.therapists {
            therapist.status = TherapistStatus::Inactive;
            therapist.check_in_at = None;
            therapist.departed_at = None;
            therapist.total_earnings = Money::ZERO;
            therapist.session_count = 0;
            therapist.expenses.clear();
            intents.push(therapist_intent(therapist));
        }

        for room in &mut self.rooms {
            if room.status == RoomStatus::Occupied {
                room.status = RoomStatus::Available;
                intents.push(room_intent(room));
            }
        }

        self.sessions.clear();
        self.walk_outs.clear();
        self.undo.clear();
        self.business_day = business_day;
        intents
    }
}

fn started_event(session: &Session, now: DateTime<Local>) -> CoreEvent {
    CoreEvent::SessionStarted {
        session_id: session.id.clone(),
        room_id: session.room_id.clone(),
        ends_at: now + chrono::Duration::minutes(i64::from(session.duration_minutes)),
    }
}

pub(crate) fn to_row<T: Serialize>(entity: &T) -> Result<Value> {
    serde_json::to_value(entity).map_err(|e| AppError::unknown(format!("Serialization failed: {}", e)))
}

fn session_intent(session: &Session) -> Result<RemoteIntent> {
    Ok(RemoteIntent::update(
        tables::SESSIONS,
        session.id.to_string(),
        to_row(session)?,
    ))
}

fn room_intent(room: &Room) -> RemoteIntent {
    RemoteIntent::update(tables::ROOMS, room.id.as_str(), json!({ "status": room.status }))
}

/// Day fields of the roster row. Expenses are not part of the hosted row.
fn therapist_intent(therapist: &Therapist) -> RemoteIntent {
    RemoteIntent::update(
        tables::THERAPISTS,
        therapist.id.as_str(),
        json!({
            "status": therapist.status,
            "check_in_at": therapist.check_in_at,
            "departed_at": therapist.departed_at,
            "total_earnings": therapist.total_earnings,
            "session_count": therapist.session_count,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{book, desk, noon};
    use spadesk_api::WalkOutReason;
    use spadesk_store::IntentOp;
    use spadesk_util::ErrorKind;

    fn mai() -> TherapistId {
        TherapistId::new("mai")
    }

    fn start(state: &mut DeskState, session_id: &SessionId) {
        state
            .apply(
                Action::StartSession {
                    session_id: session_id.clone(),
                },
                noon(),
                true,
            )
            .unwrap();
    }

    #[test]
    fn check_in_and_depart() {
        let mut state = desk();
        let ploy = TherapistId::new("ploy");

        let applied = state
            .apply(Action::CheckIn { therapist_id: ploy.clone() }, noon(), true)
            .unwrap();
        assert_eq!(state.therapist(&ploy).unwrap().status, TherapistStatus::Available);
        assert_eq!(state.therapist(&ploy).unwrap().check_in_at, Some(noon()));
        assert_eq!(applied.intents.len(), 1);
        assert_eq!(applied.intents[0].table, tables::THERAPISTS);
        assert!(applied.intents[0].payload.get("expenses").is_none());

        let err = state
            .apply(Action::CheckIn { therapist_id: ploy.clone() }, noon(), true)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BusinessRule);

        state
            .apply(Action::Depart { therapist_id: ploy.clone() }, noon(), true)
            .unwrap();
        assert_eq!(state.therapist(&ploy).unwrap().status, TherapistStatus::Departed);
    }

    #[test]
    fn booking_then_start_occupies_room_and_therapist() {
        let mut state = desk();
        let id = book(&mut state, "thai-60", &["mai"], "room-1", 200);

        let session = state.session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Scheduled);
        assert_eq!(session.total_price, Money::major(800));
        assert_eq!(state.room(&RoomId::new("room-1")).unwrap().status, RoomStatus::Available);

        let applied = state
            .apply(Action::StartSession { session_id: id.clone() }, noon(), true)
            .unwrap();
        assert_eq!(applied.intents[0].table, tables::SESSIONS);
        assert!(
            applied
                .events
                .iter()
                .any(|e| matches!(e, CoreEvent::SessionStarted { .. }))
        );
        assert_eq!(state.room(&RoomId::new("room-1")).unwrap().status, RoomStatus::Occupied);
        assert_eq!(state.therapist(&mai()).unwrap().status, TherapistStatus::InSession);
    }

    #[test]
    fn therapist_cannot_hold_two_sessions() {
        let mut state = desk();
        book(&mut state, "thai-60", &["mai"], "room-1", 0);

        let err = state
            .apply(
                Action::BookSession {
                    session_id: SessionId::new(),
                    booking: BookingRequest {
                        service_id: ServiceId::new("thai-60"),
                        therapist_ids: vec![mai()],
                        room_id: RoomId::new("room-2"),
                        discount: Money::ZERO,
                        start_now: false,
                        with_prep: false,
                        notes: None,
                    },
                },
                noon(),
                true,
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BusinessRule);
    }

    #[test]
    fn completion_credits_payout_and_frees_resources() {
        let mut state = desk();
        let id = book(&mut state, "thai-60", &["mai"], "room-1", 200);
        start(&mut state, &id);

        let applied = state
            .apply(
                Action::CompleteSession {
                    session_id: id.clone(),
                    source: CompletionSource::Manual,
                },
                noon(),
                true,
            )
            .unwrap();

        assert!(matches!(
            applied.events[0],
            CoreEvent::SessionCompleted { source: CompletionSource::Manual, .. }
        ));
        let therapist = state.therapist(&mai()).unwrap();
        assert_eq!(therapist.status, TherapistStatus::Available);
        assert_eq!(therapist.total_earnings, Money::major(400));
        assert_eq!(therapist.session_count, 1);
        assert_eq!(state.room(&RoomId::new("room-1")).unwrap().status, RoomStatus::Available);
    }

    #[test]
    fn duplicate_completion_is_a_noop() {
        let mut state = desk();
        let id = book(&mut state, "thai-60", &["mai"], "room-1", 0);
        start(&mut state, &id);

        let complete = |source| Action::CompleteSession {
            session_id: id.clone(),
            source,
        };
        state.apply(complete(CompletionSource::Manual), noon(), true).unwrap();
        let undo_depth = state.undo.len();

        let again = state.apply(complete(CompletionSource::Timer), noon(), false).unwrap();
        assert!(again.is_noop());
        assert_eq!(state.undo.len(), undo_depth);

        // Earnings credited once
        assert_eq!(state.therapist(&mai()).unwrap().total_earnings, Money::major(400));
        assert_eq!(state.therapist(&mai()).unwrap().session_count, 1);
    }

    #[test]
    fn couple_session_splits_payout() {
        let mut state = desk();
        let id = book(&mut state, "four-hands", &["mai", "noi"], "room-1", 0);
        start(&mut state, &id);
        state
            .apply(
                Action::CompleteSession {
                    session_id: id,
                    source: CompletionSource::Manual,
                },
                noon(),
                true,
            )
            .unwrap();

        assert_eq!(state.therapist(&mai()).unwrap().total_earnings, Money::major(400));
        assert_eq!(
            state.therapist(&TherapistId::new("noi")).unwrap().total_earnings,
            Money::major(400)
        );
    }

    #[test]
    fn prep_phase_then_start() {
        let mut state = desk();
        let id = book(&mut state, "thai-60", &["mai"], "room-1", 0);

        state
            .apply(Action::StartPrep { session_id: id.clone() }, noon(), true)
            .unwrap();
        let session = state.session(&id).unwrap();
        assert!(session.is_in_prep_phase);
        assert_eq!(session.status, SessionStatus::InProgress);
        assert!(session.start_time.is_none());

        let later = noon() + chrono::Duration::minutes(5);
        state
            .apply(Action::StartSession { session_id: id.clone() }, later, true)
            .unwrap();
        let session = state.session(&id).unwrap();
        assert!(!session.is_in_prep_phase);
        assert_eq!(session.start_time, Some(later));

        let err = state
            .apply(Action::StartSession { session_id: id }, later, true)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BusinessRule);
    }

    #[test]
    fn cancel_running_session_releases_without_credit() {
        let mut state = desk();
        let id = book(&mut state, "thai-60", &["mai"], "room-1", 0);
        start(&mut state, &id);

        state
            .apply(
                Action::CancelSession {
                    session_id: id.clone(),
                    reason: Some("client unwell".into()),
                },
                noon(),
                true,
            )
            .unwrap();

        let session = state.session(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);
        assert_eq!(session.notes.as_deref(), Some("Cancelled: client unwell"));
        assert_eq!(state.therapist(&mai()).unwrap().total_earnings, Money::ZERO);
        assert_eq!(state.therapist(&mai()).unwrap().status, TherapistStatus::Available);
    }

    #[test]
    fn no_show_only_before_start() {
        let mut state = desk();
        let id = book(&mut state, "thai-60", &["mai"], "room-1", 0);
        start(&mut state, &id);

        let err = state
            .apply(Action::MarkNoShow { session_id: id }, noon(), true)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BusinessRule);

        let id = book(&mut state, "thai-60", &["noi"], "room-2", 0);
        state
            .apply(Action::MarkNoShow { session_id: id.clone() }, noon(), true)
            .unwrap();
        assert_eq!(state.session(&id).unwrap().status, SessionStatus::NoShow);
    }

    #[test]
    fn walk_out_is_queued_for_insert() {
        let mut state = desk();
        let applied = state
            .apply(
                Action::RecordWalkOut {
                    walk_out_id: WalkOutId::new(),
                    request: WalkOutRequest {
                        reason: WalkOutReason::WaitingTooLong,
                        count: Some(3),
                        therapist_ids: vec![],
                        service_id: None,
                        notes: None,
                    },
                },
                noon(),
                true,
            )
            .unwrap();

        assert_eq!(applied.intents[0].operation, IntentOp::Insert);
        assert_eq!(applied.intents[0].table, tables::WALK_OUTS);
        assert_eq!(state.walk_outs[0].customers(), 3);
    }

    #[test]
    fn walk_out_count_is_bounded() {
        let mut state = desk();
        for count in [0, MAX_WALK_OUT_COUNT + 1, u32::MAX] {
            let err = state
                .apply(
                    Action::RecordWalkOut {
                        walk_out_id: WalkOutId::new(),
                        request: WalkOutRequest {
                            reason: WalkOutReason::NoRooms,
                            count: Some(count),
                            therapist_ids: vec![],
                            service_id: None,
                            notes: None,
                        },
                    },
                    noon(),
                    true,
                )
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::Validation);
        }
        assert!(state.walk_outs.is_empty());
        assert!(state.undo.is_empty());
    }

    #[test]
    fn expenses_are_local_only() {
        let mut state = desk();
        let expense_id = ExpenseId::new();
        let applied = state
            .apply(
                Action::AddExpense {
                    expense_id: expense_id.clone(),
                    therapist_id: mai(),
                    amount: Money::major(30),
                    expense_type: ExpenseType::Drinks,
                    description: None,
                },
                noon(),
                true,
            )
            .unwrap();
        assert!(applied.intents.is_empty());
        assert!(!applied.undo.unwrap().modifies_remote);
        assert_eq!(state.therapist(&mai()).unwrap().total_expenses(), Money::major(30));

        let err = state
            .apply(
                Action::AddExpense {
                    expense_id: ExpenseId::new(),
                    therapist_id: mai(),
                    amount: Money::ZERO,
                    expense_type: ExpenseType::Drinks,
                    description: None,
                },
                noon(),
                true,
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        state
            .apply(
                Action::RemoveExpense {
                    therapist_id: mai(),
                    expense_id,
                },
                noon(),
                true,
            )
            .unwrap();
        assert_eq!(state.therapist(&mai()).unwrap().total_expenses(), Money::ZERO);
    }

    #[test]
    fn room_in_use_cannot_change_status() {
        let mut state = desk();
        let id = book(&mut state, "thai-60", &["mai"], "room-1", 0);
        start(&mut state, &id);

        let err = state
            .apply(
                Action::SetRoomStatus {
                    room_id: RoomId::new("room-1"),
                    status: RoomStatus::Maintenance,
                },
                noon(),
                true,
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BusinessRule);

        let applied = state
            .apply(
                Action::SetRoomStatus {
                    room_id: RoomId::new("room-2"),
                    status: RoomStatus::Maintenance,
                },
                noon(),
                true,
            )
            .unwrap();
        assert_eq!(applied.intents[0].payload, json!({"status": "maintenance"}));
    }

    #[test]
    fn local_undo_applies_immediately() {
        let mut state = desk();
        state
            .apply(
                Action::AddExpense {
                    expense_id: ExpenseId::new(),
                    therapist_id: mai(),
                    amount: Money::major(30),
                    expense_type: ExpenseType::Towels,
                    description: None,
                },
                noon(),
                true,
            )
            .unwrap();

        let outcome = state.undo(false, noon()).unwrap();
        assert!(matches!(
            outcome,
            UndoOutcome::Applied { remote_not_reverted: false, .. }
        ));
        assert_eq!(state.therapist(&mai()).unwrap().total_expenses(), Money::ZERO);
        assert_eq!(state.undo(false, noon()).unwrap(), UndoOutcome::Empty);
    }

    #[test]
    fn remote_undo_needs_confirmation() {
        let mut state = desk();
        let id = book(&mut state, "thai-60", &["mai"], "room-1", 0);
        start(&mut state, &id);

        let outcome = state.undo(false, noon()).unwrap();
        let UndoOutcome::NeedsConfirmation(preview) = outcome else {
            panic!("expected confirmation, got {:?}", outcome);
        };
        assert!(preview.modifies_remote);
        assert!(preview.description.starts_with("Start Thai massage"));
        // Nothing reverted yet
        assert_eq!(state.session(&id).unwrap().status, SessionStatus::InProgress);

        let outcome = state.undo(true, noon()).unwrap();
        assert!(matches!(
            outcome,
            UndoOutcome::Applied { remote_not_reverted: true, .. }
        ));
        assert_eq!(state.session(&id).unwrap().status, SessionStatus::Scheduled);
        assert_eq!(state.room(&RoomId::new("room-1")).unwrap().status, RoomStatus::Available);
        assert_eq!(state.therapist(&mai()).unwrap().status, TherapistStatus::Available);

        // Undo the booking itself
        state.undo(true, noon()).unwrap();
        assert!(state.session(&id).is_none());
    }

    #[test]
    fn automatic_actions_are_not_undoable() {
        let mut state = desk();
        let id = book(&mut state, "thai-60", &["mai"], "room-1", 0);
        start(&mut state, &id);
        let depth = state.undo.len();

        state
            .apply(
                Action::CompleteSession {
                    session_id: id,
                    source: CompletionSource::Timer,
                },
                noon(),
                false,
            )
            .unwrap();
        assert_eq!(state.undo.len(), depth);
    }

    fn add_expense(state: &mut DeskState, amount: i64) -> ExpenseId {
        let expense_id = ExpenseId::new();
        state
            .apply(
                Action::AddExpense {
                    expense_id: expense_id.clone(),
                    therapist_id: mai(),
                    amount: Money::major(amount),
                    expense_type: ExpenseType::Drinks,
                    description: None,
                },
                noon(),
                true,
            )
            .unwrap();
        expense_id
    }

    #[test]
    fn undo_after_timer_completion_keeps_the_payout() {
        let mut state = desk();
        let id = book(&mut state, "thai-60", &["mai"], "room-1", 0);
        start(&mut state, &id);
        add_expense(&mut state, 30);

        let later = noon() + chrono::Duration::minutes(61);
        state
            .apply(
                Action::CompleteSession {
                    session_id: id.clone(),
                    source: CompletionSource::Timer,
                },
                later,
                false,
            )
            .unwrap();

        let outcome = state.undo(false, later).unwrap();
        assert!(matches!(
            outcome,
            UndoOutcome::Applied { remote_not_reverted: false, .. }
        ));

        let therapist = state.therapist(&mai()).unwrap();
        assert_eq!(therapist.status, TherapistStatus::Available);
        assert_eq!(therapist.total_earnings, Money::major(400));
        assert_eq!(therapist.session_count, 1);
        assert_eq!(therapist.total_expenses(), Money::ZERO);
        assert!(state.open_session_for_therapist(&mai()).is_none());

        // Booking and start were overtaken by the timer
        assert_eq!(state.undo(true, later).unwrap(), UndoOutcome::Empty);
        assert_eq!(state.session(&id).unwrap().status, SessionStatus::Completed);
        assert_eq!(state.room(&RoomId::new("room-1")).unwrap().status, RoomStatus::Available);
    }

    #[test]
    fn undo_of_expense_removal_puts_it_back() {
        let mut state = desk();
        let first = add_expense(&mut state, 30);
        add_expense(&mut state, 20);

        state
            .apply(
                Action::RemoveExpense {
                    therapist_id: mai(),
                    expense_id: first.clone(),
                },
                noon(),
                true,
            )
            .unwrap();
        assert_eq!(state.therapist(&mai()).unwrap().total_expenses(), Money::major(20));

        state.undo(false, noon()).unwrap();
        let therapist = state.therapist(&mai()).unwrap();
        assert_eq!(therapist.total_expenses(), Money::major(50));
        assert!(therapist.expenses.iter().any(|e| e.id == first));
    }

    #[test]
    fn undoing_check_in_leaves_earnings_alone() {
        let mut state = desk();
        let ploy = TherapistId::new("ploy");
        state
            .apply(Action::CheckIn { therapist_id: ploy.clone() }, noon(), true)
            .unwrap();
        state
            .therapists
            .iter_mut()
            .find(|t| t.id == ploy)
            .unwrap()
            .total_earnings = Money::major(150);

        state.undo(true, noon()).unwrap();
        let therapist = state.therapist(&ploy).unwrap();
        assert_eq!(therapist.status, TherapistStatus::Inactive);
        assert_eq!(therapist.check_in_at, None);
        assert_eq!(therapist.total_earnings, Money::major(150));
    }

    #[test]
    fn sweep_no_show_drops_stale_booking_undo() {
        let mut state = desk();
        let booked = book(&mut state, "thai-60", &["mai"], "room-1", 0);
        state
            .apply(
                Action::SetRoomStatus {
                    room_id: RoomId::new("room-2"),
                    status: RoomStatus::Maintenance,
                },
                noon(),
                true,
            )
            .unwrap();

        state
            .apply(Action::MarkNoShow { session_id: booked.clone() }, noon(), false)
            .unwrap();

        // Only the room change is left to undo
        assert_eq!(state.undo.len(), 1);
        state.undo(true, noon()).unwrap();
        assert_eq!(state.room(&RoomId::new("room-2")).unwrap().status, RoomStatus::Available);
        assert_eq!(state.session(&booked).unwrap().status, SessionStatus::NoShow);
    }

    #[test]
    fn new_day_resets_roster() {
        let mut state = desk();
        let id = book(&mut state, "thai-60", &["mai"], "room-1", 0);
        start(&mut state, &id);

        let tomorrow = state.business_day.succ_opt().unwrap();
        let intents = state.start_new_day(tomorrow);

        assert!(state.sessions.is_empty());
        assert!(state.undo.is_empty());
        assert_eq!(state.business_day, tomorrow);
        assert!(state.therapists.iter().all(|t| t.status == TherapistStatus::Inactive));
        assert_eq!(state.room(&RoomId::new("room-1")).unwrap().status, RoomStatus::Available);
        assert!(intents.iter().any(|i| i.table == tables::ROOMS));
    }
}
