//! Shared utilities for spadesk
//!
//! This crate provides:
//! - ID types (TherapistId, RoomId, ServiceId, SessionId, ...)
//! - Money arithmetic in minor units
//! - Clock helpers (mock time, business day, ISO-8601 parsing)
//! - The error taxonomy shared by every layer
//! - Retry and timeout wrappers
//! - Default paths for socket, data, and config

mod error;
mod ids;
mod money;
mod paths;
mod retry;
mod time;

pub use error::*;
pub use ids::*;
pub use money::*;
pub use paths::*;
pub use retry::*;
pub use time::*;
