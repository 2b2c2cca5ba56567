//! Domain entities and protocol types for spadesk
//!
//! This crate defines the stable vocabulary shared by the service and its
//! dashboards:
//! - Entities (therapists, rooms, services, sessions, walk-outs, expenses)
//! - Derived views (dashboard stats, closing and monthly reports)
//! - Commands, responses and events
//! - Versioning

mod commands;
mod entities;
mod events;
mod reports;
mod types;

pub use commands::*;
pub use entities::*;
pub use events::*;
pub use reports::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
