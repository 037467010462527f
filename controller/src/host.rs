use std::{
    convert::Infallible,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse,
    },
    routing::get,
    Form, Json, Router,
};
use futures_lite::{stream, Stream};
use serde::Serialize;
use tokio::{
    net::TcpListener,
    sync::{broadcast, watch, Mutex, Notify},
};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use kalorifer_common::{
    apply_submission, render_index, ControlCore, ControlUnit, CredentialKey, CredentialStore,
    ModeResolver, NetworkCredentials, NetworkMode, ProvisioningSubmission, PushEvent, RelayBusy,
    RuntimeConfig, SensorSample, StoreError,
};

use crate::sim::{SimulatedBoiler, SimulatedStation, SystemClock};

const CAPTIVE_PORTAL_PATHS: [&str; 5] = [
    "/generate_204",
    "/gen_204",
    "/hotspot-detect.html",
    "/connecttest.txt",
    "/ncsi.txt",
];

#[derive(Clone)]
struct AppState {
    unit: Arc<Mutex<ControlUnit<SimulatedBoiler>>>,
    events: broadcast::Sender<PushEvent>,
    store: AppStore,
    restart: Arc<Notify>,
    // Bumped when the server stops; open event streams end on the change.
    draining: Arc<watch::Sender<u64>>,
    restart_grace: Duration,
    web_root: Arc<PathBuf>,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    credentials: FileCredentialStore,
}

#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    if let Some(err) = runtime.sanitize() {
        warn!("runtime config rejected, using control defaults: {err}");
    }

    let (events, _) = broadcast::channel(16);
    let app_state = AppState {
        unit: Arc::new(Mutex::new(ControlUnit::new(
            ControlCore::new(runtime.control.clone()),
            SimulatedBoiler::from_env(),
        ))),
        events,
        store,
        restart: Arc::new(Notify::new()),
        draining: Arc::new(watch::channel(0).0),
        restart_grace: Duration::from_millis(runtime.network.restart_grace_ms),
        web_root: Arc::new(PathBuf::from(format!("{}/web", env!("CARGO_MANIFEST_DIR")))),
    };

    spawn_control_loop(app_state.clone());

    let port = std::env::var("KALORIFER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    loop {
        let mode = resolve_mode(&app_state.store, &runtime).await?;
        let app = match mode {
            NetworkMode::Managed => managed_router(app_state.clone()),
            NetworkMode::Provisioning => provisioning_router(app_state.clone()),
        };

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind controller server at {addr}"))?;
        info!("{} mode, listening on http://{addr}", mode.as_str());

        let restart = app_state.restart.clone();
        let draining = app_state.draining.clone();
        let interrupted = Arc::new(AtomicBool::new(false));
        let shutdown = {
            let interrupted = interrupted.clone();
            async move {
                tokio::select! {
                    _ = restart.notified() => {}
                    _ = tokio::signal::ctrl_c() => interrupted.store(true, Ordering::Relaxed),
                }
                draining.send_modify(|generation| *generation += 1);
            }
        };
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        if interrupted.load(Ordering::Relaxed) {
            info!("shutting down");
            return Ok(());
        }
        info!("restarting network stack");
    }
}

async fn resolve_mode(store: &AppStore, runtime: &RuntimeConfig) -> anyhow::Result<NetworkMode> {
    let credentials_store = store.credentials.clone();
    let resolver = ModeResolver::new(runtime.network.clone());

    tokio::task::spawn_blocking(move || {
        let credentials = NetworkCredentials::load(&credentials_store);
        let mut link = SimulatedStation::from_env();
        let mut clock = SystemClock::default();
        resolver.resolve(&credentials, &mut link, &mut clock)
    })
    .await
    .context("mode resolution task failed")
}

fn managed_router(app_state: AppState) -> Router {
    let web_root = app_state.web_root.as_ref().clone();
    Router::new()
        .route("/", get(handle_index))
        .route("/on", get(handle_relay_on))
        .route("/off", get(handle_relay_off))
        .route("/readings", get(handle_readings))
        .route("/events", get(handle_events))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state)
}

fn provisioning_router(app_state: AppState) -> Router {
    let web_root = app_state.web_root.as_ref().clone();
    let mut router = Router::new().route(
        "/",
        get(handle_provisioning_form).post(handle_provisioning_submit),
    );
    for path in CAPTIVE_PORTAL_PATHS {
        router = router.route(path, get(handle_provisioning_form));
    }
    router
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state)
}

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let tick_ms = app_state.unit.lock().await.core().config.control_tick_ms;
        let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            let output = {
                let mut unit = app_state.unit.lock().await;
                unit.actuators_mut().advance(now_ms);
                let sample = unit
                    .sensors_due(now_ms)
                    .then(|| SensorSample::read(unit.actuators_mut()));
                let output = unit.tick(now_ms, sample);
                if output.telemetry.is_some() {
                    debug!("simulated water jacket at {:.1}°C", unit.actuators().water_c());
                }
                output
            };

            if let Some(payload) = output.telemetry {
                // Send only fails when nobody is subscribed.
                let _ = app_state.events.send(PushEvent::Ping { uptime_ms: now_ms });
                let _ = app_state.events.send(PushEvent::NewReadings(payload));
            }
        }
    });
}

async fn handle_index(State(state): State<AppState>) -> axum::response::Response {
    let relay_energized = state.unit.lock().await.core().is_relay_energized();
    render_status_page(&state, relay_energized).await
}

async fn handle_relay_on(State(state): State<AppState>) -> axum::response::Response {
    force_relay(state, true).await
}

async fn handle_relay_off(State(state): State<AppState>) -> axum::response::Response {
    force_relay(state, false).await
}

async fn force_relay(state: AppState, energized: bool) -> axum::response::Response {
    let result = state.unit.lock().await.force_relay(energized);
    match result {
        Ok(()) => {
            info!("manual override: relay {}", if energized { "on" } else { "off" });
            render_status_page(&state, energized).await
        }
        Err(RelayBusy) => error_response(
            StatusCode::CONFLICT,
            "Relay is being pulsed by the over-temperature alarm",
        ),
    }
}

async fn render_status_page(state: &AppState, relay_energized: bool) -> axum::response::Response {
    match tokio::fs::read_to_string(state.web_root.join("index.html")).await {
        Ok(template) => Html(render_index(&template, relay_energized)).into_response(),
        Err(err) => {
            warn!("failed to read index.html: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Status page unavailable")
        }
    }
}

async fn handle_readings(State(state): State<AppState>) -> impl IntoResponse {
    let payload = state.unit.lock().await.core().telemetry_payload();
    Json(payload)
}

async fn handle_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = event_stream(state.events.subscribe(), state.draining.subscribe());
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn event_stream(
    events: broadcast::Receiver<PushEvent>,
    draining: watch::Receiver<u64>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((events, draining), |(mut events, mut draining)| async move {
        loop {
            let received = tokio::select! {
                _ = draining.changed() => return None,
                received = events.recv() => received,
            };
            match received {
                Ok(event) => match event.data() {
                    Ok(data) => {
                        let frame = Event::default().event(event.name()).data(data);
                        return Some((Ok(frame), (events, draining)));
                    }
                    Err(err) => warn!("push event serialization failed: {err}"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("event subscriber lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

async fn handle_provisioning_form(State(state): State<AppState>) -> axum::response::Response {
    match tokio::fs::read_to_string(state.web_root.join("wifimanager.html")).await {
        Ok(page) => Html(page).into_response(),
        Err(err) => {
            warn!("failed to read wifimanager.html: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Provisioning page unavailable")
        }
    }
}

async fn handle_provisioning_submit(
    State(state): State<AppState>,
    Form(fields): Form<Vec<(String, String)>>,
) -> axum::response::Response {
    let submission = ProvisioningSubmission::from_pairs(fields);
    let mut credentials_store = state.store.credentials.clone();

    let ack = tokio::task::spawn_blocking(move || {
        let mut credentials = NetworkCredentials::load(&credentials_store);
        apply_submission(&mut credentials_store, &submission, &mut credentials)
    })
    .await;

    match ack {
        Ok(ack) => {
            schedule_restart(&state);
            ack.into_response()
        }
        Err(err) => {
            warn!("credential update task failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store credentials")
        }
    }
}

fn schedule_restart(state: &AppState) {
    let restart = state.restart.clone();
    let grace = state.restart_grace;
    info!("restart requested, waiting {} ms", grace.as_millis());
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        restart.notify_one();
    });
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("KALORIFER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.kalorifer"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            credentials: FileCredentialStore::new(data_dir),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

impl FileCredentialStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir: Arc::new(dir) }
    }

    fn path(&self, key: CredentialKey) -> PathBuf {
        self.dir.join(format!("{}.txt", key.as_str()))
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, key: CredentialKey) -> String {
        match std::fs::read_to_string(self.path(key)) {
            Ok(value) => value.trim_end_matches(['\r', '\n']).to_string(),
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => {
                warn!(
                    "{}",
                    StoreError::Read {
                        key: key.as_str(),
                        reason: err.to_string(),
                    }
                );
                String::new()
            }
        }
    }

    fn save(&mut self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(self.dir.as_ref())?;
            std::fs::write(self.path(key), value)
        };
        write().map_err(|err| StoreError::Write {
            key: key.as_str(),
            reason: err.to_string(),
        })
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
