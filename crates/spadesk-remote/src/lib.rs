//! Hosted database access for spadeskd
//!
//! Provides:
//! - The `RemoteDatabase` trait (table-scoped select/insert/update/delete)
//! - A PostgREST-style HTTP implementation and an in-memory mock
//! - One service object per entity, reading through a local cache fallback
//! - The outbox reconciler and a connectivity monitor that triggers it

mod connectivity;
mod database;
mod mock;
mod reconciler;
mod rest;
mod services;

pub use connectivity::*;
pub use database::*;
pub use mock::*;
pub use reconciler::*;
pub use rest::*;
pub use services::*;
