//! Bounded undo history

use chrono::{DateTime, Local};
use spadesk_api::UndoPreview;
use spadesk_util::{ExpenseId, RoomId, SessionId, TherapistId, WalkOutId};
use std::collections::VecDeque;

use crate::Action;

/// An entity an undo entry would overwrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Therapist(TherapistId),
    Room(RoomId),
    Session(SessionId),
    WalkOut(WalkOutId),
    Expense(ExpenseId),
}

/// One reversible desk action
#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub description: String,
    /// The action queued writes for the hosted database
    pub modifies_remote: bool,
    pub recorded_at: DateTime<Local>,
    /// Restores captured before the action ran, applied in order
    pub(crate) inverse: Vec<Action>,
    touches: Vec<EntityRef>,
}

impl UndoEntry {
    pub(crate) fn new(
        description: String,
        modifies_remote: bool,
        recorded_at: DateTime<Local>,
        inverse: Vec<Action>,
    ) -> Self {
        let touches = inverse.iter().filter_map(Action::restored_entity).collect();
        Self {
            description,
            modifies_remote,
            recorded_at,
            inverse,
            touches,
        }
    }

    pub fn touches(&self, entity: &EntityRef) -> bool {
        self.touches.contains(entity)
    }

    pub fn preview(&self) -> UndoPreview {
        UndoPreview {
            description: self.description.clone(),
            modifies_remote: self.modifies_remote,
            recorded_at: self.recorded_at,
        }
    }
}

/// Result of an undo request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    /// Local state was reverted
    Applied {
        description: String,
        /// The hosted database still holds the original change
        remote_not_reverted: bool,
    },
    /// The top entry touched the hosted database; ask again with `confirm`
    NeedsConfirmation(UndoPreview),
    Empty,
}

/// Most recent actions, newest last. The oldest entry is dropped once
/// `max_depth` is reached.
#[derive(Debug, Clone)]
pub struct UndoStack {
    entries: VecDeque<UndoEntry>,
    max_depth: usize,
}

impl UndoStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_depth),
            max_depth,
        }
    }

    pub fn push(&mut self, entry: UndoEntry) {
        if self.max_depth == 0 {
            return;
        }
        while self.entries.len() >= self.max_depth {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn peek(&self) -> Option<UndoPreview> {
        self.entries.back().map(UndoEntry::preview)
    }

    pub fn pop(&mut self) -> Option<UndoEntry> {
        self.entries.pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop entries whose restores would overwrite any of `changed`.
    /// Returns how many were dropped.
    pub fn discard_touching(&mut self, changed: &[EntityRef]) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !changed.iter().any(|entity| entry.touches(entity)));
        before - self.entries.len()
    }
}
