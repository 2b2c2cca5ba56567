//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Global daemon settings
    #[serde(default)]
    pub daemon: RawDaemonConfig,

    /// Hosted database. Without it the desk runs on the local store only.
    #[serde(default)]
    pub remote: Option<RawRemoteConfig>,

    #[serde(default)]
    pub timers: RawTimers,

    #[serde(default)]
    pub undo: RawUndo,

    /// Service catalog seed, used when the hosted database is unreachable
    /// and nothing is cached yet
    #[serde(default)]
    pub services: Vec<RawService>,

    #[serde(default)]
    pub rooms: Vec<RawRoom>,

    #[serde(default)]
    pub roster: Vec<RawTherapist>,
}

/// Daemon-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDaemonConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Data directory for the local store
    pub data_dir: Option<PathBuf>,

    /// Log directory
    pub log_dir: Option<PathBuf>,

    /// "HH:MM" at which the business day rolls over (default 06:00)
    pub business_day_starts_at: Option<String>,

    /// Peer UIDs treated as managers (the service's own UID always is)
    #[serde(default)]
    pub manager_uids: Vec<u32>,

    /// Peer UIDs limited to read-only access
    #[serde(default)]
    pub observer_uids: Vec<u32>,
}

/// Hosted database endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRemoteConfig {
    /// Base URL, e.g. "https://project.example.co"
    pub url: String,

    /// API key. May also come from the environment at startup.
    pub api_key: Option<String>,

    pub timeout_seconds: Option<u64>,

    /// How often reachability is probed
    pub connectivity_check_seconds: Option<u64>,

    #[serde(default)]
    pub retry: Option<RawRetry>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRetry {
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub multiplier: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawTimers {
    pub session_tick_seconds: Option<u64>,
    pub attendance_sweep_seconds: Option<u64>,
    pub sync_interval_seconds: Option<u64>,

    /// Extra time past the nominal duration before the sweep expires a session
    pub session_grace_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawUndo {
    pub max_depth: Option<usize>,
}

/// Catalog entry. Amounts are in major currency units.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawService {
    pub id: String,
    pub name: String,

    /// "single", "double" or "couple"
    pub category: String,

    pub duration_minutes: u32,
    pub price: i64,
    pub lady_payout: i64,

    /// Defaults to price minus payout
    pub shop_revenue: Option<i64>,

    /// Compatible room types; empty means any
    #[serde(default)]
    pub room_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRoom {
    pub id: String,
    pub name: String,
    pub room_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTherapist {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_catalog_sections() {
        let toml_str = r#"
            config_version = 1

            [[services]]
            id = "thai-60"
            name = "Thai 60"
            category = "single"
            duration_minutes = 60
            price = 1000
            lady_payout = 400
            room_types = ["standard", "shower"]

            [[rooms]]
            id = "room-1"
            name = "Room 1"
            room_type = "standard"

            [[roster]]
            id = "mai"
            name = "Mai"
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].room_types.len(), 2);
        assert!(config.services[0].shop_revenue.is_none());
        assert_eq!(config.rooms[0].room_type, "standard");
        assert_eq!(config.roster[0].name, "Mai");
        assert!(config.remote.is_none());
    }

    #[test]
    fn parse_remote_with_retry() {
        let toml_str = r#"
            config_version = 1

            [remote]
            url = "https://desk.example.co"
            timeout_seconds = 5

            [remote.retry]
            max_attempts = 4
            initial_backoff_ms = 250
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        let remote = config.remote.unwrap();
        assert_eq!(remote.timeout_seconds, Some(5));
        assert_eq!(remote.retry.unwrap().max_attempts, Some(4));
    }
}
