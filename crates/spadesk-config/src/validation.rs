//! Configuration validation

use crate::schema::{RawConfig, RawRemoteConfig, RawRoom, RawService};
use spadesk_api::{RoomType, ServiceCategory};
use spadesk_util::WallClock;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Service '{service_id}': {message}")]
    ServiceError { service_id: String, message: String },

    #[error("Room '{room_id}': {message}")]
    RoomError { room_id: String, message: String },

    #[error("Therapist '{therapist_id}': {message}")]
    RosterError { therapist_id: String, message: String },

    #[error("Duplicate {kind} ID: {id}")]
    DuplicateId { kind: &'static str, id: String },

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("Remote config error: {0}")]
    RemoteError(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    errors.extend(find_duplicates("service", config.services.iter().map(|s| &s.id)));
    errors.extend(find_duplicates("room", config.rooms.iter().map(|r| &r.id)));
    errors.extend(find_duplicates("therapist", config.roster.iter().map(|t| &t.id)));

    for service in &config.services {
        errors.extend(validate_service(service));
    }

    for room in &config.rooms {
        errors.extend(validate_room(room));
    }

    for therapist in &config.roster {
        if therapist.id.trim().is_empty() || therapist.name.trim().is_empty() {
            errors.push(ValidationError::RosterError {
                therapist_id: therapist.id.clone(),
                message: "id and name cannot be empty".into(),
            });
        }
    }

    if let Some(value) = &config.daemon.business_day_starts_at
        && let Err(message) = WallClock::parse(value)
    {
        errors.push(ValidationError::InvalidTimeFormat {
            value: value.clone(),
            message,
        });
    }

    if let Some(remote) = &config.remote {
        errors.extend(validate_remote(remote));
    }

    let timers = [
        ("session_tick_seconds", config.timers.session_tick_seconds),
        ("attendance_sweep_seconds", config.timers.attendance_sweep_seconds),
        ("sync_interval_seconds", config.timers.sync_interval_seconds),
    ];
    for (name, value) in timers {
        if value == Some(0) {
            errors.push(ValidationError::GlobalError(format!(
                "timers.{} must be greater than zero",
                name
            )));
        }
    }

    if config.undo.max_depth == Some(0) {
        errors.push(ValidationError::GlobalError(
            "undo.max_depth must be greater than zero".into(),
        ));
    }

    errors
}

fn find_duplicates<'a>(
    kind: &'static str,
    ids: impl Iterator<Item = &'a String>,
) -> Vec<ValidationError> {
    let mut seen = HashSet::new();
    ids.filter(|id| !seen.insert(*id))
        .map(|id| ValidationError::DuplicateId {
            kind,
            id: id.clone(),
        })
        .collect()
}

fn validate_service(service: &RawService) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut fail = |message: String| {
        errors.push(ValidationError::ServiceError {
            service_id: service.id.clone(),
            message,
        })
    };

    if service.id.trim().is_empty() {
        fail("id cannot be empty".into());
    }
    if service.name.trim().is_empty() {
        fail("name cannot be empty".into());
    }
    if parse_category(&service.category).is_none() {
        fail(format!("unknown category '{}'", service.category));
    }
    if service.duration_minutes == 0 {
        fail("duration_minutes must be greater than zero".into());
    }
    if service.price < 0 || service.lady_payout < 0 || service.shop_revenue.is_some_and(|s| s < 0) {
        fail("amounts cannot be negative".into());
    }

    let shop = service
        .shop_revenue
        .unwrap_or(service.price - service.lady_payout);
    if service.lady_payout + shop > service.price {
        fail(format!(
            "lady_payout ({}) plus shop_revenue ({}) exceeds price ({})",
            service.lady_payout, shop, service.price
        ));
    }

    for room_type in &service.room_types {
        if RoomType::parse(room_type).is_none() {
            fail(format!("unknown room type '{}'", room_type));
        }
    }

    errors
}

fn validate_room(room: &RawRoom) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if room.id.trim().is_empty() || room.name.trim().is_empty() {
        errors.push(ValidationError::RoomError {
            room_id: room.id.clone(),
            message: "id and name cannot be empty".into(),
        });
    }
    if RoomType::parse(&room.room_type).is_none() {
        errors.push(ValidationError::RoomError {
            room_id: room.id.clone(),
            message: format!("unknown room type '{}'", room.room_type),
        });
    }

    errors
}

fn validate_remote(remote: &RawRemoteConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !(remote.url.starts_with("http://") || remote.url.starts_with("https://")) {
        errors.push(ValidationError::RemoteError(format!(
            "url must start with http:// or https://, got '{}'",
            remote.url
        )));
    }
    if remote.timeout_seconds == Some(0) || remote.connectivity_check_seconds == Some(0) {
        errors.push(ValidationError::RemoteError(
            "timeouts and check intervals must be greater than zero".into(),
        ));
    }
    if let Some(retry) = &remote.retry {
        if retry.max_attempts == Some(0) {
            errors.push(ValidationError::RemoteError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if retry.multiplier.is_some_and(|m| m < 1.0) {
            errors.push(ValidationError::RemoteError(
                "retry.multiplier must be at least 1.0".into(),
            ));
        }
    }

    errors
}

/// Parse a service category name
pub fn parse_category(s: &str) -> Option<ServiceCategory> {
    match s.to_lowercase().as_str() {
        "single" => Some(ServiceCategory::Single),
        "double" | "4hands" | "four_hands" => Some(ServiceCategory::Double),
        "couple" => Some(ServiceCategory::Couple),
        _ => None,
    }
}
