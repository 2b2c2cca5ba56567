//! Desk entities as stored locally and in the hosted database

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use spadesk_util::{ExpenseId, Money, RoomId, ServiceId, SessionId, TherapistId, WalkOutId};
use std::time::Duration;

/// Therapist lifecycle on a business day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TherapistStatus {
    /// On the roster but not checked in
    Inactive,
    /// Checked in and free
    Available,
    /// Serving a session
    InSession,
    /// Left for the day
    Departed,
}

impl TherapistStatus {
    pub fn is_on_duty(&self) -> bool {
        matches!(self, TherapistStatus::Available | TherapistStatus::InSession)
    }
}

/// Expense category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseType {
    Condoms,
    Lube,
    Towels,
    Drinks,
    Other,
}

/// A purchase a therapist makes from the shop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub therapist_id: TherapistId,
    pub amount: Money,
    pub expense_type: ExpenseType,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Local>,
}

/// Roster member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Therapist {
    pub id: TherapistId,
    pub name: String,
    pub status: TherapistStatus,
    #[serde(default)]
    pub check_in_at: Option<DateTime<Local>>,
    #[serde(default)]
    pub departed_at: Option<DateTime<Local>>,
    #[serde(default)]
    pub total_earnings: Money,
    #[serde(default)]
    pub session_count: u32,
    #[serde(default)]
    pub expenses: Vec<Expense>,
    /// Position in today's queue, lower goes first
    #[serde(default)]
    pub roster_position: u32,
}

impl Therapist {
    pub fn new(id: impl Into<TherapistId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: TherapistStatus::Inactive,
            check_in_at: None,
            departed_at: None,
            total_earnings: Money::ZERO,
            session_count: 0,
            expenses: Vec::new(),
            roster_position: 0,
        }
    }

    pub fn total_expenses(&self) -> Money {
        self.expenses.iter().map(|e| e.amount).sum()
    }

    /// Time on duty up to `now` (or until departure)
    pub fn working_time(&self, now: &DateTime<Local>) -> Duration {
        match self.check_in_at {
            Some(start) => {
                let end = self.departed_at.unwrap_or(*now);
                spadesk_util::elapsed_between(&start, &end)
            }
            None => Duration::ZERO,
        }
    }
}

/// Service category, determines how many therapists are booked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Single,
    Double,
    Couple,
}

impl ServiceCategory {
    pub fn therapists_required(&self) -> usize {
        match self {
            ServiceCategory::Single => 1,
            ServiceCategory::Double | ServiceCategory::Couple => 2,
        }
    }
}

/// Room type, matched against a service's compatible room types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    Standard,
    Shower,
    Large,
    VipJacuzzi,
}

impl RoomType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', ' '], "_").as_str() {
            "standard" => Some(RoomType::Standard),
            "shower" => Some(RoomType::Shower),
            "large" => Some(RoomType::Large),
            "vip_jacuzzi" | "vip" => Some(RoomType::VipJacuzzi),
            _ => None,
        }
    }
}

/// Priced catalog entry. Immutable reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub category: ServiceCategory,
    pub duration_minutes: u32,
    pub price: Money,
    /// Fixed amount paid to the therapist(s), never reduced by discounts
    pub lady_payout: Money,
    /// The shop's share of the list price
    pub shop_revenue: Money,
    /// Compatible room types; empty means any room
    #[serde(default)]
    pub room_types: Vec<RoomType>,
}

impl Service {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_minutes as u64 * 60)
    }

    pub fn fits_room(&self, room_type: RoomType) -> bool {
        self.room_types.is_empty() || self.room_types.contains(&room_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Available,
    Occupied,
    Maintenance,
}

/// Bookable location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub room_type: RoomType,
    pub status: RoomStatus,
}

impl Room {
    pub fn is_available(&self) -> bool {
        self.status == RoomStatus::Available
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::NoShow
        )
    }
}

/// A service engagement binding therapist(s), a room and a customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub therapist_ids: Vec<TherapistId>,
    pub service_id: ServiceId,
    pub room_id: RoomId,
    pub status: SessionStatus,
    #[serde(default)]
    pub discount: Money,
    /// Price after discount
    pub total_price: Money,
    /// Fixed payout copied from the service at booking
    pub lady_payout: Money,
    /// Shop share copied from the service at booking, before discount
    pub shop_revenue: Money,
    pub duration_minutes: u32,
    pub created_at: DateTime<Local>,
    /// When the billable timer started
    #[serde(default)]
    pub start_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub prep_started_at: Option<DateTime<Local>>,
    #[serde(default)]
    pub is_in_prep_phase: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Session {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_minutes as u64 * 60)
    }

    /// Occupies its room and therapists
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::InProgress
    }

    /// Counts towards takings (completed or still running)
    pub fn is_billable(&self) -> bool {
        matches!(self.status, SessionStatus::InProgress | SessionStatus::Completed)
    }

    /// Shop share after discount, never negative
    pub fn shop_share_after_discount(&self) -> Money {
        (self.shop_revenue - self.discount).clamp_zero()
    }

    pub fn involves(&self, therapist: &TherapistId) -> bool {
        self.therapist_ids.contains(therapist)
    }

    /// Remaining billable time. Prep time is not billed, so a session in
    /// its prep phase reports the full duration.
    pub fn remaining(&self, now: &DateTime<Local>) -> Duration {
        if self.status != SessionStatus::InProgress || self.is_in_prep_phase {
            return match self.status {
                SessionStatus::Scheduled | SessionStatus::InProgress => self.duration(),
                _ => Duration::ZERO,
            };
        }

        match self.start_time {
            Some(start) => self
                .duration()
                .saturating_sub(spadesk_util::elapsed_between(&start, now)),
            None => self.duration(),
        }
    }
}

/// Why a prospective customer left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkOutReason {
    NoRooms,
    NoLadies,
    PriceTooHigh,
    ClientTooPicky,
    ChinaLadies,
    WaitingTooLong,
    Other,
}

/// Largest group a single walk-out entry may record
pub const MAX_WALK_OUT_COUNT: u32 = 100;

/// A prospective session that did not convert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkOut {
    pub id: WalkOutId,
    pub reason: WalkOutReason,
    /// Number of customers in a batched entry; missing means one
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub therapist_ids: Vec<TherapistId>,
    #[serde(default)]
    pub service_id: Option<ServiceId>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Local>,
}

impl WalkOut {
    pub fn customers(&self) -> u32 {
        self.count.unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session_at(start: DateTime<Local>) -> Session {
        Session {
            id: SessionId::new(),
            therapist_ids: vec![TherapistId::new("t1")],
            service_id: ServiceId::new("s1"),
            room_id: RoomId::new("r1"),
            status: SessionStatus::InProgress,
            discount: Money::major(200),
            total_price: Money::major(800),
            lady_payout: Money::major(400),
            shop_revenue: Money::major(600),
            duration_minutes: 60,
            created_at: start,
            start_time: Some(start),
            end_time: None,
            prep_started_at: None,
            is_in_prep_phase: false,
            notes: None,
        }
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let start = Local.with_ymd_and_hms(2025, 3, 14, 20, 0, 0).unwrap();
        let session = session_at(start);

        let later = start + chrono::Duration::minutes(45);
        assert_eq!(session.remaining(&later), Duration::from_secs(15 * 60));

        let way_later = start + chrono::Duration::minutes(90);
        assert_eq!(session.remaining(&way_later), Duration::ZERO);
    }

    #[test]
    fn prep_phase_does_not_consume_time() {
        let start = Local.with_ymd_and_hms(2025, 3, 14, 20, 0, 0).unwrap();
        let mut session = session_at(start);
        session.is_in_prep_phase = true;
        session.start_time = None;

        let later = start + chrono::Duration::minutes(10);
        assert_eq!(session.remaining(&later), Duration::from_secs(60 * 60));
    }

    #[test]
    fn shop_share_never_negative() {
        let start = Local.with_ymd_and_hms(2025, 3, 14, 20, 0, 0).unwrap();
        let mut session = session_at(start);
        assert_eq!(session.shop_share_after_discount(), Money::major(400));

        session.discount = Money::major(700);
        assert_eq!(session.shop_share_after_discount(), Money::ZERO);
    }

    #[test]
    fn walk_out_count_defaults_to_one() {
        let walk_out = WalkOut {
            id: WalkOutId::new(),
            reason: WalkOutReason::NoRooms,
            count: None,
            therapist_ids: vec![],
            service_id: None,
            notes: None,
            created_at: Local::now(),
        };
        assert_eq!(walk_out.customers(), 1);
    }

    #[test]
    fn room_type_parse_accepts_variants() {
        assert_eq!(RoomType::parse("VIP Jacuzzi"), Some(RoomType::VipJacuzzi));
        assert_eq!(RoomType::parse("shower"), Some(RoomType::Shower));
        assert_eq!(RoomType::parse("sauna"), None);
    }

    #[test]
    fn session_roundtrips_iso_timestamps() {
        let start = Local.with_ymd_and_hms(2025, 3, 14, 20, 0, 0).unwrap();
        let session = session_at(start);
        let json = serde_json::to_value(&session).unwrap();
        assert!(json["start_time"].as_str().unwrap().starts_with("2025-03-14T20:00:00"));
        assert_eq!(json["status"], "in_progress");

        let parsed: Session = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, session);
    }
}
