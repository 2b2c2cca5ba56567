//! Core desk engine

use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use spadesk_api::{
    API_VERSION, ActiveSessionView, ClosingReport, CompletionSource, DashboardStats,
    DeskStateSnapshot, MonthlyReport, Room, Service, Session, SessionStatus, SyncReport,
    Therapist, TherapistView, UndoPreview, WalkOut,
};
use spadesk_config::{Catalog, Settings};
use spadesk_store::{AuditEvent, AuditEventType, DeskSnapshot, RemoteIntent, Store, tables};
use spadesk_util::{AppError, Result, TherapistId, WallClock, business_day};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::state::to_row;
use crate::{
    Action, CoreEvent, DeskState, Overdue, UndoOutcome, closing_report, compute_stats,
    due_for_completion, month_bounds, monthly_report, overdue_sessions, working_hours,
};

/// Engine tunables taken from the service configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub undo_depth: usize,
    pub day_starts_at: WallClock,
    /// Extra time before the attendance sweep closes an overdue session
    pub session_grace: Duration,
}

impl EngineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            undo_depth: settings.undo_depth,
            day_starts_at: settings.daemon.day_starts_at,
            session_grace: settings.timers.session_grace,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            undo_depth: 20,
            day_starts_at: WallClock::default(),
            session_grace: Duration::ZERO,
        }
    }
}

/// Reference and day data loaded at startup
#[derive(Debug, Clone, Default)]
pub struct Hydration {
    /// Where the data came from ("remote", "cache", ...)
    pub source: String,
    pub services: Vec<Service>,
    pub rooms: Vec<Room>,
    pub therapists: Vec<Therapist>,
    pub sessions: Vec<Session>,
    pub walk_outs: Vec<WalkOut>,
}

/// Result of an attendance sweep
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    pub events: Vec<CoreEvent>,
    pub working_hours: Vec<(TherapistId, Duration)>,
}

/// The core desk engine
pub struct CoreEngine {
    state: DeskState,
    store: Arc<dyn Store>,
    options: EngineOptions,
    /// Intents the outbox rejected, retried ahead of newer ones
    unqueued: Vec<RemoteIntent>,
}

impl CoreEngine {
    /// Create an engine for the business day containing `now`, seeded with
    /// the configured catalog
    pub fn new(
        catalog: &Catalog,
        options: EngineOptions,
        store: Arc<dyn Store>,
        now: DateTime<Local>,
    ) -> Self {
        let day = business_day(&now, options.day_starts_at);
        let state = DeskState::from_catalog(catalog, day, options.undo_depth);

        info!(
            business_day = %day,
            services = state.services.len(),
            rooms = state.rooms.len(),
            therapists = state.therapists.len(),
            "Core engine initialized"
        );

        let _ = store.append_audit(AuditEvent::new(AuditEventType::CatalogLoaded {
            source: "config".into(),
            services: state.services.len(),
            rooms: state.rooms.len(),
            therapists: state.therapists.len(),
        }));

        Self {
            state,
            store,
            options,
            unqueued: Vec::new(),
        }
    }

    pub fn state(&self) -> &DeskState {
        &self.state
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn business_day_for(&self, now: &DateTime<Local>) -> NaiveDate {
        business_day(now, self.options.day_starts_at)
    }

    /// Apply a desk action: local state first, then the outbox, audit log,
    /// cache and snapshot
    pub fn dispatch(&mut self, action: Action, now: DateTime<Local>) -> Result<Vec<CoreEvent>> {
        let mut events = self.execute(action, now, true)?;
        if !events.is_empty() {
            events.push(CoreEvent::StatsChanged(self.stats()));
        }
        Ok(events)
    }

    fn execute(
        &mut self,
        action: Action,
        now: DateTime<Local>,
        record_undo: bool,
    ) -> Result<Vec<CoreEvent>> {
        let applied = self.state.apply(action.clone(), now, record_undo)?;
        if applied.is_noop() {
            return Ok(Vec::new());
        }

        self.persist(applied.intents);

        if let Some(event) = audit_for(&action, &self.state) {
            let _ = self.store.append_audit(AuditEvent::new(event));
        }

        if let Some(undo) = &applied.undo {
            debug!(
                description = %undo.description,
                modifies_remote = undo.modifies_remote,
                "Undo entry recorded"
            );
        }

        self.save_state(now);
        Ok(applied.events)
    }

    /// Queue remote writes. Local state already changed, so a write the
    /// outbox refuses is kept in memory and in the snapshot, then retried
    /// before anything newer.
    fn persist(&mut self, intents: Vec<RemoteIntent>) {
        self.flush_unqueued();

        for intent in intents {
            if !self.unqueued.is_empty() {
                self.unqueued.push(intent);
                continue;
            }
            if let Err(e) = self.store.enqueue_intent(&intent) {
                error!(
                    table = %intent.table,
                    row_id = %intent.row_id,
                    error = %e,
                    "Failed to queue remote write, keeping it for retry"
                );
                self.unqueued.push(intent);
            }
        }
    }

    /// Move held-back writes into the outbox in order. Returns how many are
    /// still held.
    pub fn flush_unqueued(&mut self) -> usize {
        let mut queued = 0;
        for intent in &self.unqueued {
            if let Err(e) = self.store.enqueue_intent(intent) {
                debug!(held = self.unqueued.len() - queued, error = %e, "Outbox still unavailable");
                break;
            }
            queued += 1;
        }

        if queued > 0 {
            self.unqueued.drain(..queued);
            info!(queued, held = self.unqueued.len(), "Held remote writes queued");
        }
        self.unqueued.len()
    }

    /// Complete sessions whose countdown reached zero. Failures are logged
    /// and never surface to the desk.
    pub fn tick(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        for session_id in due_for_completion(&self.state.sessions, &now) {
            let action = Action::CompleteSession {
                session_id: session_id.clone(),
                source: CompletionSource::Timer,
            };
            match self.execute(action, now, false) {
                Ok(mut completed) => {
                    info!(session_id = %session_id, "Session auto-completed");
                    events.append(&mut completed);
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Auto-completion failed");
                }
            }
        }

        if !events.is_empty() {
            events.push(CoreEvent::StatsChanged(self.stats()));
        }
        events
    }

    /// Periodic attendance pass: working hours, overdue running sessions and
    /// bookings that never started
    pub fn attendance_sweep(&mut self, now: DateTime<Local>) -> SweepOutcome {
        let mut outcome = SweepOutcome {
            working_hours: working_hours(&self.state.therapists, &now),
            ..Default::default()
        };

        for overdue in overdue_sessions(&self.state.sessions, &now, self.options.session_grace) {
            let (session_id, action) = match overdue {
                Overdue::Running(id) => (
                    id.clone(),
                    Action::CompleteSession {
                        session_id: id,
                        source: CompletionSource::Sweep,
                    },
                ),
                Overdue::Unstarted(id) => (id.clone(), Action::MarkNoShow { session_id: id }),
            };

            match self.execute(action, now, false) {
                Ok(mut events) => {
                    info!(session_id = %session_id, "Overdue session closed by sweep");
                    outcome.events.append(&mut events);
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Sweep failed to close session");
                }
            }
        }

        let today = self.business_day_for(&now);
        if today > self.state.business_day {
            warn!(
                open_day = %self.state.business_day,
                today = %today,
                "Business day ended without closing"
            );
        }

        if !outcome.events.is_empty() {
            outcome.events.push(CoreEvent::StatsChanged(self.stats()));
        }

        debug!(
            on_duty = self.state.therapists.iter().filter(|t| t.status.is_on_duty()).count(),
            "Attendance sweep complete"
        );
        outcome
    }

    pub fn peek_undo(&self) -> Option<UndoPreview> {
        self.state.undo.peek()
    }

    /// Revert the most recent desk action locally
    pub fn undo(
        &mut self,
        confirm: bool,
        now: DateTime<Local>,
    ) -> Result<(UndoOutcome, Vec<CoreEvent>)> {
        let outcome = self.state.undo(confirm, now)?;
        let mut events = Vec::new();

        if let UndoOutcome::Applied {
            description,
            remote_not_reverted,
        } = &outcome
        {
            let _ = self.store.append_audit(AuditEvent::new(AuditEventType::UndoApplied {
                description: description.clone(),
                modifies_remote: *remote_not_reverted,
            }));

            info!(
                description = %description,
                remote_not_reverted,
                "Undo applied"
            );

            self.save_state(now);
            events.push(CoreEvent::UndoApplied {
                description: description.clone(),
                remote_not_reverted: *remote_not_reverted,
            });
            events.push(CoreEvent::StatsChanged(self.stats()));
        }

        Ok((outcome, events))
    }

    pub fn stats(&self) -> DashboardStats {
        compute_stats(
            &self.state.sessions,
            &self.state.therapists,
            &self.state.walk_outs,
        )
    }

    /// Writes waiting for the hosted database, including any the outbox
    /// has not taken yet
    pub fn pending_sync(&self) -> usize {
        let queued = self.store.pending_intent_count().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to count pending remote writes");
            0
        });
        queued + self.unqueued.len()
    }

    /// Full desk state for dashboards
    pub fn snapshot(&self, now: DateTime<Local>) -> DeskStateSnapshot {
        DeskStateSnapshot {
            api_version: API_VERSION,
            generated_at: now,
            therapists: self
                .state
                .therapists
                .iter()
                .map(|t| TherapistView {
                    therapist: t.clone(),
                    working_time: t.working_time(&now),
                })
                .collect(),
            rooms: self.state.rooms.clone(),
            services: self.state.services.clone(),
            sessions: self.state.sessions.clone(),
            active_sessions: self
                .state
                .active_sessions()
                .map(|s| ActiveSessionView {
                    session: s.clone(),
                    remaining: s.remaining(&now),
                    in_prep: s.is_in_prep_phase,
                })
                .collect(),
            walk_outs: self.state.walk_outs.clone(),
            stats: self.stats(),
            undo: self.peek_undo(),
            pending_sync: self.pending_sync(),
        }
    }

    /// Today's closing report without saving it
    pub fn closing_preview(&self, now: DateTime<Local>) -> ClosingReport {
        closing_report(&self.state, now)
    }

    /// Save today's closing report and start the next business day.
    /// Refused while any session is scheduled or running.
    pub fn close_day(&mut self, now: DateTime<Local>) -> Result<(ClosingReport, Vec<CoreEvent>)> {
        let open = self
            .state
            .sessions
            .iter()
            .filter(|s| !s.status.is_terminal())
            .count();
        if open > 0 {
            return Err(AppError::business(format!(
                "{} session(s) still open; complete or cancel them before closing",
                open
            )));
        }

        let report = closing_report(&self.state, now);
        self.store.save_closing_report(&report)?;

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::DayClosed {
            business_day: report.business_day,
            total_revenue: report.totals.total_revenue,
        }));

        let next_day = report
            .business_day
            .succ_opt()
            .unwrap_or(report.business_day)
            .max(self.business_day_for(&now));
        let intents = self.state.start_new_day(next_day);
        self.persist(intents);
        self.save_state(now);

        info!(
            business_day = %report.business_day,
            revenue = %report.totals.total_revenue,
            next_day = %next_day,
            "Day closed"
        );

        let events = vec![
            CoreEvent::DayClosed {
                business_day: report.business_day,
                total_revenue: report.totals.total_revenue,
            },
            CoreEvent::StatsChanged(self.stats()),
        ];
        Ok((report, events))
    }

    /// A saved closing report
    pub fn closing_report(&self, day: NaiveDate) -> Result<Option<ClosingReport>> {
        Ok(self.store.closing_report(day)?)
    }

    /// Month roll-up of saved reports, plus today's live figures while the
    /// current day is still open
    pub fn monthly_report(
        &self,
        year: i32,
        month: u32,
        now: DateTime<Local>,
    ) -> Result<MonthlyReport> {
        let (first, last) = month_bounds(year, month)?;
        let mut reports = self.store.closing_reports_between(first, last)?;

        let today = self.state.business_day;
        let has_activity = !self.state.sessions.is_empty() || !self.state.walk_outs.is_empty();
        if (first..=last).contains(&today)
            && has_activity
            && !reports.iter().any(|r| r.business_day == today)
        {
            reports.push(self.closing_preview(now));
        }

        Ok(monthly_report(year, month, &reports))
    }

    /// Replace reference data and today's sessions with data loaded at
    /// startup. Empty collections keep what the engine already has.
    pub fn hydrate(&mut self, hydration: Hydration, now: DateTime<Local>) {
        let day = self.state.business_day;
        let starts_at = self.options.day_starts_at;

        if !hydration.services.is_empty() {
            self.state.services = hydration.services;
        }
        if !hydration.rooms.is_empty() {
            self.state.rooms = hydration.rooms;
        }
        if !hydration.therapists.is_empty() {
            self.state.therapists = hydration.therapists;
            self.state.sort_roster();
        }
        self.state.undo.clear();

        let sessions: Vec<_> = hydration
            .sessions
            .into_iter()
            .filter(|s| business_day(&s.created_at, starts_at) == day)
            .collect();
        if !sessions.is_empty() {
            self.state.sessions = sessions;
        }

        let walk_outs: Vec<_> = hydration
            .walk_outs
            .into_iter()
            .filter(|w| business_day(&w.created_at, starts_at) == day)
            .collect();
        if !walk_outs.is_empty() {
            self.state.walk_outs = walk_outs;
        }

        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::CatalogLoaded {
            source: hydration.source.clone(),
            services: self.state.services.len(),
            rooms: self.state.rooms.len(),
            therapists: self.state.therapists.len(),
        }));

        info!(
            source = %hydration.source,
            services = self.state.services.len(),
            rooms = self.state.rooms.len(),
            therapists = self.state.therapists.len(),
            sessions = self.state.sessions.len(),
            "Desk hydrated"
        );

        self.save_state(now);
    }

    /// Merge freshly loaded reference data into the running day. Local day
    /// fields (status, earnings, expenses) win over the loaded rows; rooms
    /// and therapists still in use are never dropped.
    pub fn refresh_reference(
        &mut self,
        services: Vec<Service>,
        rooms: Vec<Room>,
        therapists: Vec<Therapist>,
        now: DateTime<Local>,
    ) -> (usize, usize, usize) {
        if !services.is_empty() {
            self.state.services = services;
        }

        if !rooms.is_empty() {
            let mut merged = Vec::with_capacity(rooms.len());
            for mut room in rooms {
                if let Some(local) = self.state.room(&room.id) {
                    room.status = local.status;
                }
                merged.push(room);
            }
            for local in &self.state.rooms {
                let in_use = self.state.open_session_for_room(&local.id).is_some();
                if in_use && !merged.iter().any(|r| r.id == local.id) {
                    merged.push(local.clone());
                }
            }
            self.state.rooms = merged;
        }

        if !therapists.is_empty() {
            let mut merged = Vec::with_capacity(therapists.len());
            for mut therapist in therapists {
                if let Some(local) = self.state.therapist(&therapist.id) {
                    therapist.status = local.status;
                    therapist.check_in_at = local.check_in_at;
                    therapist.departed_at = local.departed_at;
                    therapist.total_earnings = local.total_earnings;
                    therapist.session_count = local.session_count;
                    therapist.expenses = local.expenses.clone();
                }
                merged.push(therapist);
            }
            for local in &self.state.therapists {
                let busy = local.status.is_on_duty()
                    || self.state.open_session_for_therapist(&local.id).is_some();
                if busy && !merged.iter().any(|t| t.id == local.id) {
                    merged.push(local.clone());
                }
            }
            self.state.therapists = merged;
            self.state.sort_roster();
        }

        self.save_state(now);

        (
            self.state.services.len(),
            self.state.rooms.len(),
            self.state.therapists.len(),
        )
    }

    /// Restore the last saved snapshot if it belongs to the current
    /// business day
    pub fn recover(&mut self, now: DateTime<Local>) -> bool {
        let snapshot = match self.store.load_snapshot() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return false,
            Err(e) => {
                warn!(error = %e, "Failed to load desk snapshot");
                return false;
            }
        };

        let today = self.business_day_for(&now);
        if snapshot.business_day != today {
            info!(
                snapshot_day = %snapshot.business_day,
                today = %today,
                "Ignoring snapshot from another business day"
            );
            return false;
        }

        self.state.business_day = snapshot.business_day;
        if !snapshot.services.is_empty() {
            self.state.services = snapshot.services;
        }
        if !snapshot.rooms.is_empty() {
            self.state.rooms = snapshot.rooms;
        }
        if !snapshot.therapists.is_empty() {
            self.state.therapists = snapshot.therapists;
            self.state.sort_roster();
        }
        self.state.sessions = snapshot.sessions;
        self.state.walk_outs = snapshot.walk_outs;
        self.state.undo.clear();
        if !snapshot.unqueued.is_empty() {
            warn!(held = snapshot.unqueued.len(), "Recovered remote writes not yet queued");
            self.unqueued = snapshot.unqueued;
        }

        info!(
            saved_at = %snapshot.saved_at,
            sessions = self.state.sessions.len(),
            open = self
                .state
                .sessions
                .iter()
                .filter(|s| s.status == SessionStatus::InProgress)
                .count(),
            "Desk state recovered from snapshot"
        );
        true
    }

    /// Write the snapshot and mirror the desk into the entity cache
    pub fn save_state(&self, now: DateTime<Local>) {
        self.mirror_cache();

        let snapshot = DeskSnapshot {
            saved_at: now,
            business_day: self.state.business_day,
            therapists: self.state.therapists.clone(),
            rooms: self.state.rooms.clone(),
            services: self.state.services.clone(),
            sessions: self.state.sessions.clone(),
            walk_outs: self.state.walk_outs.clone(),
            unqueued: self.unqueued.clone(),
        };
        if let Err(e) = self.store.save_snapshot(&snapshot) {
            warn!(error = %e, "Failed to save desk snapshot");
        }
    }

    fn mirror_cache(&self) {
        let state = &self.state;
        let mirrored = [
            (tables::THERAPISTS, cache_rows(&state.therapists, |t| t.id.to_string())),
            (tables::ROOMS, cache_rows(&state.rooms, |r| r.id.to_string())),
            (tables::SERVICES, cache_rows(&state.services, |s| s.id.to_string())),
            (tables::SESSIONS, cache_rows(&state.sessions, |s| s.id.to_string())),
            (tables::WALK_OUTS, cache_rows(&state.walk_outs, |w| w.id.to_string())),
            (
                tables::EXPENSES,
                cache_rows(
                    state.therapists.iter().flat_map(|t| t.expenses.iter()),
                    |e| e.id.to_string(),
                ),
            ),
        ];

        for (table, rows) in mirrored {
            if let Err(e) = self.store.cache_replace(table, &rows) {
                warn!(table, error = %e, "Failed to mirror desk into cache");
            }
        }
    }

    /// Record a finished reconciliation pass
    pub fn record_sync(&self, report: &SyncReport) {
        if report.attempted == 0 {
            return;
        }
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::SyncFinished {
            synced: report.synced,
            failed: report.failed,
        }));
    }
}

fn cache_rows<'a, T: Serialize + 'a>(
    items: impl IntoIterator<Item = &'a T>,
    id: impl Fn(&T) -> String,
) -> Vec<(String, Value)> {
    items
        .into_iter()
        .filter_map(|item| to_row(item).ok().map(|row| (id(item), row)))
        .collect()
}

fn audit_for(action: &Action, state: &DeskState) -> Option<AuditEventType> {
    let event = match action {
        Action::CheckIn { therapist_id } => AuditEventType::TherapistCheckedIn {
            therapist_id: therapist_id.clone(),
        },
        Action::Depart { therapist_id } => AuditEventType::TherapistDeparted {
            therapist_id: therapist_id.clone(),
        },
        Action::BookSession { session_id, .. } => {
            let session = state.session(session_id)?;
            AuditEventType::SessionBooked {
                session_id: session_id.clone(),
                service_id: session.service_id.clone(),
                room_id: session.room_id.clone(),
                therapist_ids: session.therapist_ids.clone(),
                total_price: session.total_price,
            }
        }
        Action::StartSession { session_id } => AuditEventType::SessionStarted {
            session_id: session_id.clone(),
        },
        Action::CompleteSession { session_id, source } => AuditEventType::SessionCompleted {
            session_id: session_id.clone(),
            source: *source,
        },
        Action::CancelSession { session_id, .. } => AuditEventType::SessionClosed {
            session_id: session_id.clone(),
            status: SessionStatus::Cancelled,
        },
        Action::MarkNoShow { session_id } => AuditEventType::SessionClosed {
            session_id: session_id.clone(),
            status: SessionStatus::NoShow,
        },
        Action::RecordWalkOut {
            walk_out_id,
            request,
        } => AuditEventType::WalkOutRecorded {
            walk_out_id: walk_out_id.clone(),
            reason: request.reason,
            customers: request.count.unwrap_or(1),
        },
        Action::AddExpense {
            therapist_id,
            expense_id,
            amount,
            ..
        } => AuditEventType::ExpenseAdded {
            therapist_id: therapist_id.clone(),
            expense_id: expense_id.clone(),
            amount: *amount,
        },
        Action::RemoveExpense {
            therapist_id,
            expense_id,
        } => AuditEventType::ExpenseRemoved {
            therapist_id: therapist_id.clone(),
            expense_id: expense_id.clone(),
        },
        Action::SetRoomStatus { room_id, status } => AuditEventType::RoomStatusChanged {
            room_id: room_id.clone(),
            status: *status,
        },
        _ => return None,
    };
    Some(event)
}
