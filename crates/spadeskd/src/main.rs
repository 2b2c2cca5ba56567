//! spadeskd - The spadesk front-desk service
//!
//! This is the main entry point for the spadeskd service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Hosted database access, reconciliation and connectivity monitoring
//! - Core engine
//! - IPC server

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use spadesk_api::{
    ClientRole, Command, CompletionSource, ErrorCode, ErrorInfo, Event, EventPayload,
    HealthStatus, Response, ResponsePayload, Room, Service, Session, SyncReport, Therapist,
    TherapistStatus, WalkOut,
};
use spadesk_config::{Settings, TimerConfig, load_config};
use spadesk_core::{Action, CoreEngine, CoreEvent, EngineOptions, Hydration, UndoOutcome};
use spadesk_ipc::{IpcServer, RolePolicy, ServerMessage};
use spadesk_remote::{
    AttendanceService, CatalogService, ConnectivityEvent, ConnectivityMonitor, ConnectivityStatus, DataSource,
    Reconciler, RemoteContext, RemoteDatabase, RestConfig, RestDatabase, RoomService,
    RosterService, SessionService, WalkOutService,
};
use spadesk_store::{AuditEvent, AuditEventType, SqliteStore, Store, tables};
use spadesk_util::{
    ClientId, ExpenseId, SessionId, WallClock, WalkOutId, default_config_path, format_duration,
};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// How many recent sessions and walk-outs to pull when hydrating today
const HYDRATE_LIMIT: usize = 500;

/// spadeskd - Front-desk service for a spa
#[derive(Parser, Debug)]
#[command(name = "spadeskd")]
#[command(about = "Front-desk state, timers and sync for a spa", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/spadesk/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set SPADESK_SOCKET env var)
    #[arg(short, long, env = "SPADESK_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set SPADESK_DATA_DIR env var)
    #[arg(short, long, env = "SPADESK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "SPADESK_LOG_JSON")]
    json_logs: bool,

    /// Hosted database API key (overrides the config file)
    #[arg(long, env = "SPADESK_REMOTE_KEY", hide_env_values = true)]
    remote_key: Option<String>,
}

/// Hosted database collaborators
struct Remote {
    ctx: RemoteContext,
    reconciler: Arc<Reconciler>,
    connectivity: ConnectivityStatus,
}

/// Main service state
struct Daemon {
    engine: CoreEngine,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    remote: Option<Remote>,
    monitor: Option<(ConnectivityMonitor, mpsc::Receiver<ConnectivityEvent>)>,
    timers: TimerConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl Daemon {
    async fn new(args: &Args, settings: Settings) -> Result<Self> {
        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| settings.daemon.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| settings.daemon.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("spadeskd.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::DaemonStarted))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (remote, monitor) =
            match build_remote(&settings, args.remote_key.clone(), &store, shutdown_rx)? {
                Some((remote, monitor)) => (Some(remote), Some(monitor)),
                None => {
                    info!("No hosted database configured, running local-only");
                    (None, None)
                }
            };

        let now = spadesk_util::now();
        let mut engine = CoreEngine::new(
            &settings.catalog,
            EngineOptions::from_settings(&settings),
            store.clone(),
            now,
        );

        // A same-day snapshot holds the freshest local state; otherwise
        // start from the hosted database, then the cache, then config
        if engine.recover(now) {
            if let Some(remote) = &remote {
                match load_reference(&remote.ctx).await {
                    Ok((services, rooms, therapists, DataSource::Remote)) => {
                        engine.refresh_reference(services, rooms, therapists, now);
                    }
                    Ok(_) => debug!("Hosted database unreachable, keeping recovered reference data"),
                    Err(e) => warn!(error = %e, "Failed to load reference data"),
                }
            }
        } else {
            let hydration = match &remote {
                Some(remote) => {
                    let day = engine.business_day_for(&now);
                    hydrate_from_remote(&remote.ctx, day, settings.daemon.day_starts_at).await
                }
                None => hydrate_from_cache(store.as_ref()),
            };
            engine.hydrate(hydration, now);
        }

        let policy = RolePolicy::for_current_user(
            settings.daemon.manager_uids.clone(),
            settings.daemon.observer_uids.clone(),
        );
        let mut ipc = IpcServer::new(&socket_path, policy);
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        Ok(Self {
            engine,
            ipc: Arc::new(ipc),
            store,
            remote,
            monitor,
            timers: settings.timers,
            shutdown_tx,
        })
    }

    async fn run(mut self) -> Result<()> {
        let mut ipc_messages = self
            .ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let ipc_accept = self.ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut connectivity_rx = match self.monitor.take() {
            Some((monitor, rx)) => {
                tokio::spawn(monitor.run());
                Some(rx)
            }
            None => None,
        };

        let (sync_tx, mut sync_rx) = mpsc::channel::<spadesk_util::Result<SyncReport>>(4);

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        let mut tick_timer = tokio::time::interval(self.timers.session_tick);
        let mut sweep_timer = tokio::time::interval(self.timers.attendance_sweep);
        let mut sync_timer = tokio::time::interval(self.timers.sync_interval);
        for timer in [&mut tick_timer, &mut sweep_timer, &mut sync_timer] {
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        }
        let has_remote = self.remote.is_some();

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }

                // SIGHUP reloads reference data from the hosted database
                _ = sighup.recv() => {
                    info!("Received SIGHUP, refreshing reference data");
                    if let Err(e) = self.refresh().await {
                        warn!(message = %e.message, "Refresh failed");
                    }
                }

                _ = tick_timer.tick() => {
                    let events = self.engine.tick(spadesk_util::now());
                    self.broadcast(events);
                }

                _ = sweep_timer.tick() => {
                    let outcome = self.engine.attendance_sweep(spadesk_util::now());
                    for (therapist_id, worked) in &outcome.working_hours {
                        debug!(therapist_id = %therapist_id, worked = %format_duration(*worked), "Working hours");
                    }
                    self.broadcast(outcome.events);
                }

                _ = sync_timer.tick(), if has_remote => {
                    self.spawn_sync(&sync_tx);
                }

                Some(result) = sync_rx.recv() => {
                    self.finish_sync(result);
                }

                Some(event) = next_connectivity(&mut connectivity_rx) => {
                    let online = event == ConnectivityEvent::Online;
                    self.ipc.broadcast_event(Event::new(EventPayload::ConnectivityChanged { online }));
                    if online {
                        info!("Hosted database reachable again, draining outbox");
                        self.spawn_sync(&sync_tx);
                    } else {
                        warn!(pending = self.engine.pending_sync(), "Hosted database unreachable, queueing writes locally");
                    }
                }

                Some(msg) = ipc_messages.recv() => {
                    self.handle_ipc_message(msg).await;
                }
            }
        }

        info!("Shutting down spadeskd");

        let _ = self.shutdown_tx.send(true);
        self.engine.save_state(spadesk_util::now());
        self.ipc.broadcast_event(Event::new(EventPayload::Shutdown));

        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::DaemonStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        self.ipc.shutdown();
        info!(pending_sync = self.engine.pending_sync(), "Shutdown complete");
        Ok(())
    }

    fn broadcast(&self, events: Vec<CoreEvent>) {
        for event in events {
            self.ipc.broadcast_event(Event::new(event.into()));
        }
    }

    fn broadcast_state(&self) {
        let state = self.engine.snapshot(spadesk_util::now());
        self.ipc.broadcast_event(Event::new(EventPayload::StateChanged(state)));
    }

    /// Run a reconciliation pass in the background; the result comes back
    /// through `sync_tx`
    fn spawn_sync(&mut self, sync_tx: &mpsc::Sender<spadesk_util::Result<SyncReport>>) {
        let Some(reconciler) = self.remote.as_ref().map(|r| r.reconciler.clone()) else {
            return;
        };
        self.engine.flush_unqueued();
        let tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = reconciler.run_once().await;
            let _ = tx.send(result).await;
        });
    }

    fn finish_sync(&self, result: spadesk_util::Result<SyncReport>) {
        match result {
            Ok(report) => {
                self.engine.record_sync(&report);
                if report.attempted > 0 {
                    self.ipc
                        .broadcast_event(Event::new(EventPayload::SyncCompleted(report)));
                }
            }
            Err(e) => {
                warn!(error = %e, "Reconciliation pass failed");
                self.ipc.broadcast_event(Event::new(EventPayload::SyncFailed {
                    message: e.message,
                    pending: self.engine.pending_sync(),
                }));
            }
        }
    }

    /// Reload services, rooms and roster from the hosted database
    async fn refresh(&mut self) -> std::result::Result<ResponsePayload, ErrorInfo> {
        let remote = self.remote.as_ref().ok_or_else(no_remote)?;
        let (services, rooms, therapists, source) =
            load_reference(&remote.ctx).await.map_err(ErrorInfo::from)?;

        if source == DataSource::Cache {
            return Err(ErrorInfo::new(
                ErrorCode::RemoteUnavailable,
                "Hosted database unreachable, reference data unchanged",
            ));
        }

        let (services, rooms, therapists) =
            self.engine
                .refresh_reference(services, rooms, therapists, spadesk_util::now());
        info!(services, rooms, therapists, "Reference data refreshed");
        self.broadcast_state();

        Ok(ResponsePayload::Refreshed {
            therapists,
            rooms,
            services,
        })
    }

    async fn handle_ipc_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                let role = self
                    .ipc
                    .get_client_info(&client_id)
                    .await
                    .map(|info| info.role)
                    .unwrap_or(ClientRole::Observer);

                let subscribing = matches!(request.command, Command::SubscribeEvents);

                let result = if request.command.allowed_for(role) {
                    self.handle_command(&client_id, role, request.command).await
                } else {
                    warn!(client_id = %client_id, role = ?role, "Command not permitted");
                    Err(permission_denied())
                };

                let response = match result {
                    Ok(payload) => Response::success(request.request_id, payload),
                    Err(error) => Response::error(request.request_id, error),
                };
                let _ = self.ipc.send_response(&client_id, response).await;

                // New subscribers start from a full picture
                if subscribing {
                    let state = self.engine.snapshot(spadesk_util::now());
                    let event = Event::new(EventPayload::StateChanged(state));
                    let _ = self.ipc.send_event_to(&client_id, &event).await;
                }
            }
            ServerMessage::ClientConnected { client_id, info } => {
                info!(
                    client_id = %client_id,
                    role = ?info.role,
                    uid = ?info.uid,
                    "Client connected"
                );

                let _ = self
                    .store
                    .append_audit(AuditEvent::new(AuditEventType::ClientConnected {
                        client_id: client_id.to_string(),
                        role: format!("{:?}", info.role),
                        uid: info.uid,
                    }));
            }
            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");

                let _ = self
                    .store
                    .append_audit(AuditEvent::new(AuditEventType::ClientDisconnected {
                        client_id: client_id.to_string(),
                    }));
            }
        }
    }

    /// Apply a desk action and fan its events out to dashboards
    fn dispatch(&mut self, action: Action) -> std::result::Result<(), ErrorInfo> {
        let events = self
            .engine
            .dispatch(action, spadesk_util::now())
            .map_err(|e| {
                debug!(error = %e, "Action rejected");
                ErrorInfo::from(&e)
            })?;
        self.broadcast(events);
        Ok(())
    }

    fn therapist(&self, id: &spadesk_util::TherapistId) -> std::result::Result<ResponsePayload, ErrorInfo> {
        self.engine
            .state()
            .therapist(id)
            .cloned()
            .map(ResponsePayload::Therapist)
            .ok_or_else(|| not_found("Therapist", id))
    }

    fn session(&self, id: &SessionId) -> std::result::Result<ResponsePayload, ErrorInfo> {
        self.engine
            .state()
            .session(id)
            .cloned()
            .map(ResponsePayload::Session)
            .ok_or_else(|| not_found("Session", id))
    }

    async fn handle_command(
        &mut self,
        client_id: &ClientId,
        role: ClientRole,
        command: Command,
    ) -> std::result::Result<ResponsePayload, ErrorInfo> {
        let now = spadesk_util::now();

        match command {
            Command::GetState => Ok(ResponsePayload::State(self.engine.snapshot(now))),

            Command::GetStats => Ok(ResponsePayload::Stats(self.engine.stats())),

            Command::CheckIn { therapist_id } => {
                self.dispatch(Action::CheckIn {
                    therapist_id: therapist_id.clone(),
                })?;
                self.therapist(&therapist_id)
            }

            Command::Depart { therapist_id } => {
                self.dispatch(Action::Depart {
                    therapist_id: therapist_id.clone(),
                })?;
                self.therapist(&therapist_id)
            }

            Command::BookSession { booking } => {
                let session_id = SessionId::new();
                self.dispatch(Action::BookSession {
                    session_id: session_id.clone(),
                    booking,
                })?;
                self.session(&session_id)
            }

            Command::StartPrep { session_id } => {
                self.dispatch(Action::StartPrep {
                    session_id: session_id.clone(),
                })?;
                self.session(&session_id)
            }

            Command::StartSession { session_id } => {
                self.dispatch(Action::StartSession {
                    session_id: session_id.clone(),
                })?;
                self.session(&session_id)
            }

            Command::CompleteSession { session_id } => {
                self.dispatch(Action::CompleteSession {
                    session_id: session_id.clone(),
                    source: CompletionSource::Manual,
                })?;
                self.session(&session_id)
            }

            Command::CancelSession { session_id, reason } => {
                self.dispatch(Action::CancelSession {
                    session_id: session_id.clone(),
                    reason,
                })?;
                self.session(&session_id)
            }

            Command::MarkNoShow { session_id } => {
                self.dispatch(Action::MarkNoShow {
                    session_id: session_id.clone(),
                })?;
                self.session(&session_id)
            }

            Command::RecordWalkOut { walk_out } => {
                let walk_out_id = WalkOutId::new();
                self.dispatch(Action::RecordWalkOut {
                    walk_out_id: walk_out_id.clone(),
                    request: walk_out,
                })?;
                self.engine
                    .state()
                    .walk_out(&walk_out_id)
                    .cloned()
                    .map(ResponsePayload::WalkOut)
                    .ok_or_else(|| not_found("Walk-out", &walk_out_id))
            }

            Command::AddExpense {
                therapist_id,
                amount,
                expense_type,
                description,
            } => {
                self.dispatch(Action::AddExpense {
                    expense_id: ExpenseId::new(),
                    therapist_id: therapist_id.clone(),
                    amount,
                    expense_type,
                    description,
                })?;
                self.therapist(&therapist_id)
            }

            Command::RemoveExpense {
                therapist_id,
                expense_id,
            } => {
                self.dispatch(Action::RemoveExpense {
                    therapist_id: therapist_id.clone(),
                    expense_id,
                })?;
                self.therapist(&therapist_id)
            }

            Command::SetRoomStatus { room_id, status } => {
                self.dispatch(Action::SetRoomStatus {
                    room_id: room_id.clone(),
                    status,
                })?;
                self.engine
                    .state()
                    .room(&room_id)
                    .cloned()
                    .map(ResponsePayload::Room)
                    .ok_or_else(|| not_found("Room", &room_id))
            }

            Command::PeekUndo => Ok(ResponsePayload::UndoPreview {
                preview: self.engine.peek_undo(),
            }),

            Command::Undo { confirm } => {
                if let Some(preview) = self.engine.peek_undo()
                    && preview.modifies_remote
                    && !role.can_undo_remote()
                {
                    return Err(ErrorInfo::new(
                        ErrorCode::PermissionDenied,
                        format!(
                            "\"{}\" was already sent to the hosted database; a manager must undo it",
                            preview.description
                        ),
                    ));
                }

                let (outcome, events) = self.engine.undo(confirm, now).map_err(ErrorInfo::from)?;
                match outcome {
                    UndoOutcome::Applied {
                        description,
                        remote_not_reverted,
                    } => {
                        info!(client_id = %client_id, description = %description, "Undo applied");
                        self.broadcast(events);
                        self.broadcast_state();
                        Ok(ResponsePayload::Undone {
                            description,
                            remote_not_reverted,
                        })
                    }
                    UndoOutcome::NeedsConfirmation(preview) => Err(ErrorInfo::new(
                        ErrorCode::ConfirmationRequired,
                        format!(
                            "\"{}\" was already sent to the hosted database; undo only reverts the desk. Confirm to continue.",
                            preview.description
                        ),
                    )),
                    UndoOutcome::Empty => Err(ErrorInfo::new(ErrorCode::NotFound, "Nothing to undo")),
                }
            }

            Command::GetClosingReport { business_day } => match business_day {
                None => Ok(ResponsePayload::ClosingReport(self.engine.closing_preview(now))),
                Some(day) => self
                    .engine
                    .closing_report(day)
                    .map_err(ErrorInfo::from)?
                    .map(ResponsePayload::ClosingReport)
                    .ok_or_else(|| not_found("Closing report", day)),
            },

            Command::CloseDay => {
                let (report, events) = self.engine.close_day(now).map_err(ErrorInfo::from)?;
                info!(client_id = %client_id, business_day = %report.business_day, "Day closed from dashboard");
                self.broadcast(events);
                self.broadcast_state();
                Ok(ResponsePayload::ClosingReport(report))
            }

            Command::GetMonthlyReport { year, month } => self
                .engine
                .monthly_report(year, month, now)
                .map(ResponsePayload::MonthlyReport)
                .map_err(ErrorInfo::from),

            Command::SyncNow => {
                self.engine.flush_unqueued();
                let remote = self.remote.as_ref().ok_or_else(no_remote)?;
                let report = remote.reconciler.run_once().await.map_err(ErrorInfo::from)?;
                self.finish_sync(Ok(report.clone()));
                Ok(ResponsePayload::Synced(report))
            }

            Command::Refresh => self.refresh().await,

            Command::SubscribeEvents => Ok(ResponsePayload::Subscribed {
                client_id: client_id.clone(),
            }),

            Command::UnsubscribeEvents => Ok(ResponsePayload::Unsubscribed),

            Command::GetHealth => {
                let online = match &self.remote {
                    Some(remote) => remote.connectivity.is_online().await,
                    None => false,
                };
                Ok(ResponsePayload::Health(HealthStatus {
                    live: true,
                    store_ok: self.store.is_healthy(),
                    remote_ok: self.remote.is_none() || online,
                    online,
                    pending_sync: self.engine.pending_sync(),
                }))
            }

            Command::Ping => Ok(ResponsePayload::Pong),
        }
    }
}

fn not_found(kind: &str, id: impl Display) -> ErrorInfo {
    ErrorInfo::new(ErrorCode::NotFound, format!("{} not found: {}", kind, id))
}

fn no_remote() -> ErrorInfo {
    ErrorInfo::new(ErrorCode::RemoteUnavailable, "No hosted database configured")
}

fn permission_denied() -> ErrorInfo {
    ErrorInfo::new(ErrorCode::PermissionDenied, "Not permitted for this role")
}

async fn next_connectivity(
    rx: &mut Option<mpsc::Receiver<ConnectivityEvent>>,
) -> Option<ConnectivityEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

type RemoteParts = (Remote, (ConnectivityMonitor, mpsc::Receiver<ConnectivityEvent>));

fn build_remote(
    settings: &Settings,
    key_override: Option<String>,
    store: &Arc<dyn Store>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<Option<RemoteParts>> {
    let Some(config) = &settings.remote else {
        return Ok(None);
    };

    let Some(api_key) = key_override.or_else(|| config.api_key.clone()) else {
        warn!(url = %config.url, "Hosted database configured without an API key, running local-only");
        return Ok(None);
    };

    let db: Arc<dyn RemoteDatabase> = Arc::new(
        RestDatabase::new(RestConfig {
            base_url: config.url.clone(),
            api_key,
            timeout: config.timeout,
        })
        .context("Failed to create hosted database client")?,
    );

    let ctx = RemoteContext::new(db.clone(), store.clone())
        .with_retry(config.retry.clone())
        .with_timeout(config.timeout);
    let reconciler = Arc::new(Reconciler::new(db.clone(), store.clone()).with_timeout(config.timeout));
    let (monitor, events) = ConnectivityMonitor::new(db, config.connectivity_check, shutdown_rx);

    info!(url = %config.url, "Hosted database configured");

    Ok(Some((
        Remote {
            ctx,
            reconciler,
            connectivity: monitor.status(),
        },
        (monitor, events),
    )))
}

/// Services, rooms and roster, and whether all three came from the hosted
/// database
async fn load_reference(
    ctx: &RemoteContext,
) -> spadesk_util::Result<(Vec<Service>, Vec<Room>, Vec<Therapist>, DataSource)> {
    let services = CatalogService::new(ctx.clone()).list().await?;
    let rooms = RoomService::new(ctx.clone()).list().await?;
    let therapists = RosterService::new(ctx.clone()).list().await?;

    let source = if [services.source, rooms.source, therapists.source]
        .iter()
        .all(|s| *s == DataSource::Remote)
    {
        DataSource::Remote
    } else {
        DataSource::Cache
    };

    Ok((services.items, rooms.items, therapists.items, source))
}

async fn hydrate_from_remote(ctx: &RemoteContext, day: NaiveDate, day_starts_at: WallClock) -> Hydration {
    let (services, rooms, therapists, source) = match load_reference(ctx).await {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!(error = %e, "No reference data from hosted database or cache, using config");
            return Hydration {
                source: "config".into(),
                ..Default::default()
            };
        }
    };

    let therapists = match AttendanceService::new(ctx.clone(), day_starts_at)
        .checked_in_on(day)
        .await
    {
        Ok(attendance) => clear_stale_attendance(therapists, &attendance.items),
        Err(e) => {
            warn!(error = %e, "Failed to load attendance, keeping roster rows as loaded");
            therapists
        }
    };

    let sessions = match SessionService::new(ctx.clone()).recent(HYDRATE_LIMIT).await {
        Ok(fetched) => fetched.items,
        Err(e) => {
            warn!(error = %e, "Failed to load recent sessions");
            Vec::new()
        }
    };
    let walk_outs = match WalkOutService::new(ctx.clone()).recent(HYDRATE_LIMIT).await {
        Ok(fetched) => fetched.items,
        Err(e) => {
            warn!(error = %e, "Failed to load recent walk-outs");
            Vec::new()
        }
    };

    Hydration {
        source: match source {
            DataSource::Remote => "remote".into(),
            DataSource::Cache => "cache".into(),
        },
        services,
        rooms,
        therapists,
        sessions,
        walk_outs,
    }
}

/// Reset the day fields of therapists whose attendance belongs to an
/// earlier business day that was never closed
fn clear_stale_attendance(therapists: Vec<Therapist>, checked_in: &[Therapist]) -> Vec<Therapist> {
    therapists
        .into_iter()
        .map(|therapist| {
            let stale = (therapist.check_in_at.is_some() || therapist.status != TherapistStatus::Inactive)
                && !checked_in.iter().any(|t| t.id == therapist.id);
            if !stale {
                return therapist;
            }
            debug!(therapist_id = %therapist.id, status = ?therapist.status, "Clearing attendance from an earlier day");
            Therapist {
                roster_position: therapist.roster_position,
                ..Therapist::new(therapist.id, therapist.name)
            }
        })
        .collect()
}

fn hydrate_from_cache(store: &dyn Store) -> Hydration {
    Hydration {
        source: "cache".into(),
        services: cached(store, tables::SERVICES),
        rooms: cached(store, tables::ROOMS),
        therapists: cached(store, tables::THERAPISTS),
        sessions: cached::<Session>(store, tables::SESSIONS),
        walk_outs: cached::<WalkOut>(store, tables::WALK_OUTS),
    }
}

fn cached<T: serde::de::DeserializeOwned>(store: &dyn Store, table: &str) -> Vec<T> {
    match store.cache_list(table) {
        Ok(rows) => rows
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(table, error = %e, "Skipping unreadable cached row");
                    None
                }
            })
            .collect(),
        Err(e) => {
            warn!(table, error = %e, "Failed to read cache");
            Vec::new()
        }
    }
}

fn init_logging(args: &Args, log_dir: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let writer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;
            let path = dir.join("spadeskd.log");
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(log_dir.is_none())
        .with_writer(writer);

    if args.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    init_logging(&args, settings.daemon.log_dir.as_deref())?;

    info!(version = env!("CARGO_PKG_VERSION"), "spadeskd starting");
    info!(
        config_path = %args.config.display(),
        services = settings.catalog.services.len(),
        rooms = settings.catalog.rooms.len(),
        roster = settings.catalog.roster.len(),
        "Configuration loaded"
    );

    let daemon = Daemon::new(&args, settings).await?;
    daemon.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn therapist(id: &str, status: TherapistStatus, position: u32) -> Therapist {
        let mut therapist = Therapist::new(id, id);
        therapist.status = status;
        therapist.roster_position = position;
        if status != TherapistStatus::Inactive {
            therapist.check_in_at = Some(spadesk_util::now());
            therapist.session_count = 3;
        }
        therapist
    }

    #[test]
    fn attendance_from_an_unclosed_day_is_cleared() {
        let today = therapist("mai", TherapistStatus::Available, 0);
        let stale = therapist("lin", TherapistStatus::InSession, 1);
        let resting = therapist("kim", TherapistStatus::Inactive, 2);

        let roster = clear_stale_attendance(
            vec![today.clone(), stale, resting.clone()],
            std::slice::from_ref(&today),
        );

        assert_eq!(roster[0], today);
        assert_eq!(roster[1].status, TherapistStatus::Inactive);
        assert!(roster[1].check_in_at.is_none());
        assert_eq!(roster[1].session_count, 0);
        assert_eq!(roster[1].roster_position, 1);
        assert_eq!(roster[2], resting);
    }
}
