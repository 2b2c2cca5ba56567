//! Booking validation

use spadesk_api::{BookingRequest, Service, SessionStatus, TherapistStatus};
use spadesk_util::{AppError, Money, Result};
use std::collections::HashSet;

use crate::DeskState;

/// Prices fixed at booking time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingQuote {
    pub total_price: Money,
    pub lady_payout: Money,
    pub shop_revenue: Money,
    pub duration_minutes: u32,
}

impl BookingQuote {
    fn for_service(service: &Service, discount: Money) -> Self {
        Self {
            total_price: service.price - discount,
            lady_payout: service.lady_payout,
            shop_revenue: service.shop_revenue,
            duration_minutes: service.duration_minutes,
        }
    }
}

/// Check a booking against the current desk state.
///
/// Unknown ids and malformed input are validation errors; a busy room or
/// therapist is a business-rule error the desk can resolve by waiting.
pub fn validate_booking(state: &DeskState, booking: &BookingRequest) -> Result<BookingQuote> {
    let service = state
        .service(&booking.service_id)
        .ok_or_else(|| AppError::validation(format!("Unknown service: {}", booking.service_id)))?;

    let room = state
        .room(&booking.room_id)
        .ok_or_else(|| AppError::validation(format!("Unknown room: {}", booking.room_id)))?;

    let required = service.category.therapists_required();
    if booking.therapist_ids.len() != required {
        return Err(AppError::validation(format!(
            "{} needs {} therapist(s), got {}",
            service.name,
            required,
            booking.therapist_ids.len()
        )));
    }

    let distinct: HashSet<_> = booking.therapist_ids.iter().collect();
    if distinct.len() != booking.therapist_ids.len() {
        return Err(AppError::validation("The same therapist was selected twice"));
    }

    if booking.discount.is_negative() {
        return Err(AppError::validation("Discount cannot be negative"));
    }
    if booking.discount > service.price {
        return Err(AppError::validation(format!(
            "Discount {} exceeds the price {}",
            booking.discount, service.price
        )));
    }

    if booking.with_prep && !booking.start_now {
        return Err(AppError::validation(
            "A prep phase can only be started with the session",
        ));
    }

    for id in &booking.therapist_ids {
        let therapist = state
            .therapist(id)
            .ok_or_else(|| AppError::validation(format!("Unknown therapist: {}", id)))?;

        match therapist.status {
            TherapistStatus::Available => {}
            TherapistStatus::InSession => {
                return Err(AppError::business(format!(
                    "{} is already in a session",
                    therapist.name
                )));
            }
            TherapistStatus::Inactive | TherapistStatus::Departed => {
                return Err(AppError::business(format!(
                    "{} is not checked in",
                    therapist.name
                )));
            }
        }

        if state.open_session_for_therapist(id).is_some() {
            return Err(AppError::business(format!(
                "{} already has a booked session",
                therapist.name
            )));
        }
    }

    if !room.is_available() {
        return Err(AppError::business(format!("{} is not available", room.name)));
    }
    if let Some(other) = state.open_session_for_room(&room.id)
        && other.status == SessionStatus::Scheduled
    {
        return Err(AppError::business(format!(
            "{} is already booked",
            room.name
        )));
    }
    if !service.fits_room(room.room_type) {
        return Err(AppError::business(format!(
            "{} cannot be performed in {}",
            service.name, room.name
        )));
    }

    Ok(BookingQuote::for_service(service, booking.discount))
}
