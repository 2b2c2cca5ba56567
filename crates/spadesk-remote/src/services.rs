//! Per-entity service objects
//!
//! Each service reads from the hosted database with retry and timeout, and
//! falls back to the local entity cache when the remote read fails. Services
//! only read: every desk write reaches the hosted database via the outbox.

use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use spadesk_api::{Expense, Room, Service, Session, Therapist, WalkOut};
use spadesk_store::{Store, tables};
use spadesk_util::{Result, RetryPolicy, WallClock, business_day, with_retry, with_timeout};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Query, RemoteDatabase, Row};

/// An entity stored in a hosted table
pub trait RemoteEntity: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: &'static str;

    fn row_id(&self) -> String;
}

impl RemoteEntity for Room {
    const TABLE: &'static str = tables::ROOMS;
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

impl RemoteEntity for Therapist {
    const TABLE: &'static str = tables::THERAPISTS;
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

impl RemoteEntity for Service {
    const TABLE: &'static str = tables::SERVICES;
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

impl RemoteEntity for Session {
    const TABLE: &'static str = tables::SESSIONS;
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

impl RemoteEntity for WalkOut {
    const TABLE: &'static str = tables::WALK_OUTS;
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

impl RemoteEntity for Expense {
    const TABLE: &'static str = tables::EXPENSES;
    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

/// Where a read was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Remote,
    Cache,
}

/// Result of a read
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub items: Vec<T>,
    pub source: DataSource,
}

/// Collaborators shared by every entity service
#[derive(Clone)]
pub struct RemoteContext {
    pub db: Arc<dyn RemoteDatabase>,
    pub store: Arc<dyn Store>,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl RemoteContext {
    pub fn new(db: Arc<dyn RemoteDatabase>, store: Arc<dyn Store>) -> Self {
        Self {
            db,
            store,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Generic table access for one entity type
pub struct EntityService<T> {
    ctx: RemoteContext,
    _entity: PhantomData<fn() -> T>,
}

impl<T: RemoteEntity> EntityService<T> {
    pub fn new(ctx: RemoteContext) -> Self {
        Self {
            ctx,
            _entity: PhantomData,
        }
    }

    /// Select rows, falling back to the cache if the hosted database fails
    pub async fn list(&self, query: &Query) -> Result<Fetched<T>> {
        let op = format!("{}.select", T::TABLE);
        let db = &self.ctx.db;
        let timeout = self.ctx.timeout;

        let remote = with_retry(&self.ctx.retry, &op, || {
            with_timeout(timeout, db.select(T::TABLE, query))
        })
        .await;

        match remote {
            Ok(rows) => {
                let items = decode_rows::<T>(rows);
                self.refresh_cache(query, &items);
                Ok(Fetched {
                    items,
                    source: DataSource::Remote,
                })
            }
            Err(e) => {
                warn!(table = T::TABLE, error = %e, "Remote read failed, using local cache");
                let cached = self.ctx.store.cache_list(T::TABLE).map_err(|store_err| {
                    warn!(table = T::TABLE, error = %store_err, "Cache read failed");
                    e.clone()
                })?;
                Ok(Fetched {
                    items: decode_rows::<T>(query.apply(cached)),
                    source: DataSource::Cache,
                })
            }
        }
    }

    fn cache_entity(&self, entity: &T) {
        match serde_json::to_value(entity) {
            Ok(row) => {
                if let Err(e) = self.ctx.store.cache_put(T::TABLE, &entity.row_id(), &row) {
                    warn!(table = T::TABLE, error = %e, "Failed to cache row");
                }
            }
            Err(e) => warn!(table = T::TABLE, error = %e, "Failed to encode row for cache"),
        }
    }

    fn refresh_cache(&self, query: &Query, items: &[T]) {
        if query.is_unfiltered() {
            let rows: Vec<(String, Row)> = items
                .iter()
                .filter_map(|item| Some((item.row_id(), serde_json::to_value(item).ok()?)))
                .collect();
            if let Err(e) = self.ctx.store.cache_replace(T::TABLE, &rows) {
                warn!(table = T::TABLE, error = %e, "Failed to refresh cache");
            }
        } else {
            items.iter().for_each(|item| self.cache_entity(item));
        }
        debug!(table = T::TABLE, rows = items.len(), "Cache updated from remote");
    }
}

/// Decode rows, skipping (and logging) any that do not match the entity shape
fn decode_rows<T: RemoteEntity>(rows: Vec<Row>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(entity) => Some(entity),
            Err(e) => {
                warn!(table = T::TABLE, error = %e, "Skipping malformed row");
                None
            }
        })
        .collect()
}

/// Rooms, ordered by name
pub struct RoomService {
    inner: EntityService<Room>,
}

impl RoomService {
    pub fn new(ctx: RemoteContext) -> Self {
        Self {
            inner: EntityService::new(ctx),
        }
    }

    pub async fn list(&self) -> Result<Fetched<Room>> {
        self.inner.list(&Query::new().order_by("name")).await
    }
}

/// Therapists on the roster, in queue order
pub struct RosterService {
    inner: EntityService<Therapist>,
}

impl RosterService {
    pub fn new(ctx: RemoteContext) -> Self {
        Self {
            inner: EntityService::new(ctx),
        }
    }

    pub async fn list(&self) -> Result<Fetched<Therapist>> {
        self.inner.list(&Query::new().order_by("roster_position")).await
    }
}

/// The priced service catalog
pub struct CatalogService {
    inner: EntityService<Service>,
}

impl CatalogService {
    pub fn new(ctx: RemoteContext) -> Self {
        Self {
            inner: EntityService::new(ctx),
        }
    }

    pub async fn list(&self) -> Result<Fetched<Service>> {
        self.inner.list(&Query::new().order_by("name")).await
    }
}

/// Session history
pub struct SessionService {
    inner: EntityService<Session>,
}

impl SessionService {
    pub fn new(ctx: RemoteContext) -> Self {
        Self {
            inner: EntityService::new(ctx),
        }
    }

    /// Most recent sessions first
    pub async fn recent(&self, limit: usize) -> Result<Fetched<Session>> {
        self.inner
            .list(&Query::new().order_by_desc("created_at").limit(limit))
            .await
    }
}

/// Walk-out log
pub struct WalkOutService {
    inner: EntityService<WalkOut>,
}

impl WalkOutService {
    pub fn new(ctx: RemoteContext) -> Self {
        Self {
            inner: EntityService::new(ctx),
        }
    }

    pub async fn recent(&self, limit: usize) -> Result<Fetched<WalkOut>> {
        self.inner
            .list(&Query::new().order_by_desc("created_at").limit(limit))
            .await
    }
}

/// Attendance as recorded on the therapists table
pub struct AttendanceService {
    inner: EntityService<Therapist>,
    day_starts_at: WallClock,
}

impl AttendanceService {
    pub fn new(ctx: RemoteContext, day_starts_at: WallClock) -> Self {
        Self {
            inner: EntityService::new(ctx),
            day_starts_at,
        }
    }

    /// Therapists who checked in during `day`, departed or not
    pub async fn checked_in_on(&self, day: NaiveDate) -> Result<Fetched<Therapist>> {
        let fetched = self
            .inner
            .list(&Query::new().order_by("roster_position"))
            .await?;
        let starts_at = self.day_starts_at;
        Ok(Fetched {
            items: fetched
                .items
                .into_iter()
                .filter(|t| {
                    t.check_in_at
                        .is_some_and(|at| business_day(&at, starts_at) == day)
                })
                .collect(),
            source: fetched.source,
        })
    }

    /// Therapists checked in during `day` and still on duty
    pub async fn on_duty(&self, day: NaiveDate) -> Result<Fetched<Therapist>> {
        let mut fetched = self.checked_in_on(day).await?;
        fetched.items.retain(|t| t.status.is_on_duty());
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockDatabase;
    use chrono::{DateTime, Local, TimeZone};
    use spadesk_api::{RoomStatus, RoomType, TherapistStatus};
    use spadesk_store::SqliteStore;
    use spadesk_util::RoomId;

    fn room(id: &str, name: &str, status: RoomStatus) -> Room {
        Room {
            id: RoomId::new(id),
            name: name.into(),
            room_type: RoomType::Standard,
            status,
        }
    }

    fn context(db: Arc<MockDatabase>) -> (RemoteContext, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let ctx = RemoteContext::new(db, store.clone()).with_retry(RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 2.0,
        });
        (ctx, store)
    }

    fn seed_rooms(db: &MockDatabase) {
        db.seed(
            tables::ROOMS,
            vec![
                serde_json::to_value(room("r2", "Zen", RoomStatus::Available)).unwrap(),
                serde_json::to_value(room("r1", "Bamboo", RoomStatus::Occupied)).unwrap(),
                serde_json::to_value(room("r3", "Lotus", RoomStatus::Available)).unwrap(),
            ],
        );
    }

    #[tokio::test]
    async fn rooms_are_ordered_by_name() {
        let db = Arc::new(MockDatabase::new());
        seed_rooms(&db);
        let (ctx, _) = context(db);

        let rooms = RoomService::new(ctx).list().await.unwrap();
        assert_eq!(rooms.source, DataSource::Remote);
        let names: Vec<_> = rooms.items.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Bamboo", "Lotus", "Zen"]);
    }

    #[tokio::test]
    async fn falls_back_to_cache_when_offline() {
        let db = Arc::new(MockDatabase::new());
        seed_rooms(&db);
        let (ctx, store) = context(db.clone());
        let rooms = RoomService::new(ctx);

        // Warm the cache
        rooms.list().await.unwrap();
        assert_eq!(store.cache_list(tables::ROOMS).unwrap().len(), 3);

        db.set_offline(true);
        let cached = rooms.list().await.unwrap();
        assert_eq!(cached.source, DataSource::Cache);
        let names: Vec<_> = cached.items.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Bamboo", "Lotus", "Zen"]);

        // The read was retried before falling back
        assert_eq!(db.select_calls(), 3);
    }

    fn attendee(id: &str, status: TherapistStatus, check_in_at: Option<DateTime<Local>>) -> Row {
        let mut therapist = Therapist::new(id, id);
        therapist.status = status;
        therapist.check_in_at = check_in_at;
        serde_json::to_value(therapist).unwrap()
    }

    #[tokio::test]
    async fn attendance_is_scoped_to_the_business_day() {
        let db = Arc::new(MockDatabase::new());
        let at = |d, h| Local.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap();
        db.seed(
            tables::THERAPISTS,
            vec![
                attendee("mai", TherapistStatus::Available, Some(at(10, 9))),
                // Still inside the 9 March night shift
                attendee("lin", TherapistStatus::InSession, Some(at(10, 3))),
                attendee("hoa", TherapistStatus::Departed, Some(at(10, 11))),
                attendee("kim", TherapistStatus::Inactive, None),
            ],
        );
        let (ctx, _) = context(db);
        let attendance = AttendanceService::new(ctx, WallClock::default());
        let day = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();

        let checked_in = attendance.checked_in_on(day).await.unwrap();
        let ids: Vec<_> = checked_in.items.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["mai", "hoa"]);

        let on_duty = attendance.on_duty(day).await.unwrap();
        assert_eq!(on_duty.source, DataSource::Remote);
        assert_eq!(on_duty.items.len(), 1);
        assert_eq!(on_duty.items[0].id.as_str(), "mai");

        let previous = attendance.on_duty(day.pred_opt().unwrap()).await.unwrap();
        assert_eq!(previous.items.len(), 1);
        assert_eq!(previous.items[0].id.as_str(), "lin");
    }
}
