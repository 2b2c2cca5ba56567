//! Desk state machine and derived views for spadeskd
//!
//! This crate is the heart of spadeskd, containing:
//! - The desk state and its action reducer
//! - Booking validation (therapists, room, catalog entry, discount)
//! - Live stats and closing/monthly reports as pure folds
//! - Session countdowns and the attendance sweep
//! - The bounded undo stack
//! - The engine that persists outbox intents, audit, cache and snapshots

mod booking;
mod closing;
mod engine;
mod events;
mod state;
mod stats;
mod timers;
mod undo;

pub use booking::*;
pub use closing::*;
pub use engine::*;
pub use events::*;
pub use state::*;
pub use stats::*;
pub use timers::*;
pub use undo::*;

#[cfg(test)]
pub(crate) mod tests_support {
    use crate::{Action, DeskState};
    use chrono::{DateTime, Local, NaiveDate, TimeZone};
    use spadesk_api::{
        BookingRequest, Room, RoomStatus, RoomType, Service, ServiceCategory, Therapist,
        TherapistStatus,
    };
    use spadesk_util::{Money, RoomId, ServiceId, SessionId, TherapistId};

    pub fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    pub fn service(
        id: &str,
        name: &str,
        category: ServiceCategory,
        price: i64,
        payout: i64,
        room_types: Vec<RoomType>,
    ) -> Service {
        Service {
            id: ServiceId::new(id),
            name: name.into(),
            category,
            duration_minutes: 60,
            price: Money::major(price),
            lady_payout: Money::major(payout),
            shop_revenue: Money::major(price - payout),
            room_types,
        }
    }

    pub fn room(id: &str, name: &str, room_type: RoomType) -> Room {
        Room {
            id: RoomId::new(id),
            name: name.into(),
            room_type,
            status: RoomStatus::Available,
        }
    }

    /// Two therapists on duty, one not yet in
    pub fn desk() -> DeskState {
        let mut state = DeskState::new(NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(), 20);
        state.services = vec![
            service("thai-60", "Thai massage", ServiceCategory::Single, 1000, 400, vec![]),
            service("four-hands", "Four hands", ServiceCategory::Double, 2000, 800, vec![]),
            service(
                "jacuzzi",
                "Jacuzzi ritual",
                ServiceCategory::Single,
                1500,
                600,
                vec![RoomType::VipJacuzzi],
            ),
        ];
        state.rooms = vec![
            room("room-1", "Lotus", RoomType::Standard),
            room("room-2", "Orchid", RoomType::Shower),
            room("vip", "VIP suite", RoomType::VipJacuzzi),
        ];
        state.therapists = ["Mai", "Noi", "Ploy"]
            .iter()
            .enumerate()
            .map(|(position, name)| {
                let mut therapist = Therapist::new(name.to_lowercase(), *name);
                therapist.roster_position = position as u32;
                if position < 2 {
                    therapist.status = TherapistStatus::Available;
                    therapist.check_in_at = Some(noon() - chrono::Duration::hours(2));
                }
                therapist
            })
            .collect();
        state
    }

    pub fn book(
        state: &mut DeskState,
        service_id: &str,
        therapists: &[&str],
        room_id: &str,
        discount: i64,
    ) -> SessionId {
        let session_id = SessionId::new();
        state
            .apply(
                Action::BookSession {
                    session_id: session_id.clone(),
                    booking: BookingRequest {
                        service_id: ServiceId::new(service_id),
                        therapist_ids: therapists.iter().map(|t| TherapistId::new(*t)).collect(),
                        room_id: RoomId::new(room_id),
                        discount: Money::major(discount),
                        start_now: false,
                        with_prep: false,
                        notes: None,
                    },
                },
                noon(),
                true,
            )
            .unwrap();
        session_id
    }
}
