//! Validated settings and catalog

use crate::schema::{RawConfig, RawDaemonConfig, RawRemoteConfig, RawRetry, RawService, RawTimers};
use crate::validation::parse_category;
use spadesk_api::{Room, RoomStatus, RoomType, Service, ServiceCategory, Therapist};
use spadesk_util::{Money, RetryPolicy, RoomId, ServiceId, TherapistId, WallClock};
use std::path::PathBuf;
use std::time::Duration;

/// Validated configuration ready for use by the service
#[derive(Debug, Clone)]
pub struct Settings {
    pub daemon: DaemonConfig,

    /// None means local-only operation
    pub remote: Option<RemoteConfig>,

    pub timers: TimerConfig,

    /// Maximum number of undo entries kept
    pub undo_depth: usize,

    /// Seed catalog, roster and rooms
    pub catalog: Catalog,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let roster = raw
            .roster
            .into_iter()
            .enumerate()
            .map(|(position, t)| {
                let mut therapist = Therapist::new(t.id, t.name);
                therapist.roster_position = position as u32;
                therapist
            })
            .collect();

        let rooms = raw
            .rooms
            .into_iter()
            .map(|r| Room {
                id: RoomId::new(r.id),
                name: r.name,
                room_type: RoomType::parse(&r.room_type).unwrap_or(RoomType::Standard),
                status: RoomStatus::Available,
            })
            .collect();

        Self {
            daemon: DaemonConfig::from_raw(raw.daemon),
            remote: raw.remote.map(RemoteConfig::from_raw),
            timers: TimerConfig::from_raw(&raw.timers),
            undo_depth: raw.undo.max_depth.unwrap_or(DEFAULT_UNDO_DEPTH),
            catalog: Catalog {
                services: raw.services.into_iter().map(convert_service).collect(),
                rooms,
                roster,
            },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            remote: None,
            timers: TimerConfig::default(),
            undo_depth: DEFAULT_UNDO_DEPTH,
            catalog: Catalog::default(),
        }
    }
}

const DEFAULT_UNDO_DEPTH: usize = 20;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub day_starts_at: WallClock,
    pub manager_uids: Vec<u32>,
    pub observer_uids: Vec<u32>,
}

impl DaemonConfig {
    fn from_raw(raw: RawDaemonConfig) -> Self {
        Self {
            socket_path: raw
                .socket_path
                .unwrap_or_else(spadesk_util::default_socket_path),
            data_dir: raw.data_dir.unwrap_or_else(spadesk_util::default_data_dir),
            log_dir: raw.log_dir,
            day_starts_at: raw
                .business_day_starts_at
                .as_deref()
                .and_then(|s| WallClock::parse(s).ok())
                .unwrap_or_default(),
            manager_uids: raw.manager_uids,
            observer_uids: raw.observer_uids,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_raw(RawDaemonConfig::default())
    }
}

/// Hosted database endpoint
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub connectivity_check: Duration,
    pub retry: RetryPolicy,
}

impl RemoteConfig {
    fn from_raw(raw: RawRemoteConfig) -> Self {
        Self {
            url: raw.url.trim_end_matches('/').to_string(),
            api_key: raw.api_key,
            timeout: Duration::from_secs(raw.timeout_seconds.unwrap_or(10)),
            connectivity_check: Duration::from_secs(raw.connectivity_check_seconds.unwrap_or(15)),
            retry: convert_retry(raw.retry.unwrap_or_default()),
        }
    }
}

/// Intervals driving the background loops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    pub session_tick: Duration,
    pub attendance_sweep: Duration,
    pub sync_interval: Duration,
    pub session_grace: Duration,
}

impl TimerConfig {
    fn from_raw(raw: &RawTimers) -> Self {
        let defaults = Self::default();
        Self {
            session_tick: raw
                .session_tick_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_tick),
            attendance_sweep: raw
                .attendance_sweep_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.attendance_sweep),
            sync_interval: raw
                .sync_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.sync_interval),
            session_grace: raw
                .session_grace_minutes
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.session_grace),
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            session_tick: Duration::from_secs(1),
            attendance_sweep: Duration::from_secs(30),
            sync_interval: Duration::from_secs(60),
            session_grace: Duration::ZERO,
        }
    }
}

/// Reference data the desk starts from
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub services: Vec<Service>,
    pub rooms: Vec<Room>,
    pub roster: Vec<Therapist>,
}

impl Catalog {
    pub fn get_service(&self, id: &ServiceId) -> Option<&Service> {
        self.services.iter().find(|s| &s.id == id)
    }

    pub fn get_room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| &r.id == id)
    }

    pub fn get_therapist(&self, id: &TherapistId) -> Option<&Therapist> {
        self.roster.iter().find(|t| &t.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.rooms.is_empty() && self.roster.is_empty()
    }
}

// Conversion helpers

fn convert_service(raw: RawService) -> Service {
    let shop = raw.shop_revenue.unwrap_or(raw.price - raw.lady_payout);
    let room_types = raw
        .room_types
        .iter()
        .filter_map(|t| RoomType::parse(t))
        .collect();

    Service {
        id: ServiceId::new(raw.id),
        name: raw.name,
        category: parse_category(&raw.category).unwrap_or(ServiceCategory::Single),
        duration_minutes: raw.duration_minutes,
        price: Money::major(raw.price),
        lady_payout: Money::major(raw.lady_payout),
        shop_revenue: Money::major(shop),
        room_types,
    }
}

fn convert_retry(raw: RawRetry) -> RetryPolicy {
    let defaults = RetryPolicy::default();
    RetryPolicy {
        max_attempts: raw.max_attempts.unwrap_or(defaults.max_attempts),
        initial_backoff: raw
            .initial_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_backoff),
        max_backoff: raw
            .max_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_backoff),
        multiplier: raw.multiplier.unwrap_or(defaults.multiplier),
    }
}
