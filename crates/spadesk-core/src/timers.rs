//! Session countdowns and the attendance sweep
//!
//! Remaining time is derived from wall-clock timestamps stored on the
//! session, so a restart picks up where the desk left off.

use chrono::{DateTime, Local};
use spadesk_api::{Session, SessionStatus, Therapist};
use spadesk_util::{SessionId, TherapistId, elapsed_between};
use std::time::Duration;

/// Countdown for one open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClock {
    pub session_id: SessionId,
    pub remaining: Duration,
    pub in_prep: bool,
}

impl SessionClock {
    pub fn of(session: &Session, now: &DateTime<Local>) -> Self {
        Self {
            session_id: session.id.clone(),
            remaining: session.remaining(now),
            in_prep: session.is_in_prep_phase,
        }
    }

    /// Billable time ran out
    pub fn is_expired(&self) -> bool {
        !self.in_prep && self.remaining.is_zero()
    }
}

/// Running, non-prep sessions whose countdown reached zero
pub fn due_for_completion(sessions: &[Session], now: &DateTime<Local>) -> Vec<SessionId> {
    sessions
        .iter()
        .filter(|s| s.status == SessionStatus::InProgress)
        .map(|s| SessionClock::of(s, now))
        .filter(SessionClock::is_expired)
        .map(|clock| clock.session_id)
        .collect()
}

/// A session the attendance sweep should close
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Overdue {
    /// Still running past its duration plus grace
    Running(SessionId),
    /// Never started, and its slot has long passed
    Unstarted(SessionId),
}

/// Sessions past their duration plus `grace`, measured from the billable
/// start, the prep start, or the booking time, whichever applies.
pub fn overdue_sessions(sessions: &[Session], now: &DateTime<Local>, grace: Duration) -> Vec<Overdue> {
    sessions
        .iter()
        .filter_map(|s| {
            let limit = s.duration() + grace;
            match s.status {
                SessionStatus::InProgress => {
                    let from = s.start_time.or(s.prep_started_at).unwrap_or(s.created_at);
                    (elapsed_between(&from, now) > limit).then(|| Overdue::Running(s.id.clone()))
                }
                SessionStatus::Scheduled => (elapsed_between(&s.created_at, now) > limit)
                    .then(|| Overdue::Unstarted(s.id.clone())),
                _ => None,
            }
        })
        .collect()
}

/// Time on duty per roster member, zero for anyone who never checked in
pub fn working_hours(therapists: &[Therapist], now: &DateTime<Local>) -> Vec<(TherapistId, Duration)> {
    therapists
        .iter()
        .map(|t| (t.id.clone(), t.working_time(now)))
        .collect()
}
