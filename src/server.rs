//! Daemon HTTP surface.
//!
//! The browser extension is a thin shim: it forwards tab and context-menu
//! events here, renders whatever arrives on the popup socket, and applies
//! badge and popup commands from the host socket.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/events` | Submit a browser event; processed in the background |
//! | `GET`  | `/popup` | WebSocket; current snapshot on connect, then every push |
//! | `GET`  | `/host` | WebSocket; badge and open-popup commands |
//! | `GET`  | `/snapshot` | Latest snapshot, once no run is in flight |
//! | `GET`/`PUT` | `/settings` | Read or partially update settings |
//! | `GET`/`PUT` | `/vaults` | Read or replace the vault list |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_settings", "message": "vaults 'a' and 'b' both use port 51361" } }
//! ```
//!
//! Error codes: `bad_request` (400), `invalid_settings` (400),
//! `unavailable` (503), `internal` (500).

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::coordinator::{BrowserEvent, Coordinator};
use crate::fetch::VaultFetcher;
use crate::models::{Settings, SettingsPatch, Snapshot, Vault};
use crate::publish::Publisher;
use crate::search::Pipeline;
use crate::storage::{KeyValueStore, SettingsError, SettingsStore, SqliteStore};

const EVENT_QUEUE: usize = 64;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    /// Owns the pipeline, the publisher and the browser session.
    coordinator: Arc<Coordinator>,
    /// Queue feeding [`Coordinator::run`]; `POST /events` only enqueues.
    events: mpsc::Sender<BrowserEvent>,
}

impl AppState {
    fn settings(&self) -> &SettingsStore {
        self.coordinator.pipeline().settings()
    }
}

/// Starts the daemon on `[server].bind` backed by the SQLite store.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(config).await?);
    let listener = TcpListener::bind(&config.server.bind).await?;
    serve(config, kv, listener).await
}

/// Wires the pipeline, publisher and coordinator on top of `kv` and serves
/// the HTTP surface on `listener`.
pub async fn serve(
    config: &Config,
    kv: Arc<dyn KeyValueStore>,
    listener: TcpListener,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(
        SettingsStore::new(kv.clone(), config.defaults.clone()),
        VaultFetcher::new(&config.backend)?,
    );
    let publisher = Arc::new(Publisher::open(kv.clone()).await?);
    let coordinator = Arc::new(Coordinator::new(pipeline, publisher));

    coordinator.spawn_storage_listener(&kv);
    let (events, rx) = mpsc::channel(EVENT_QUEUE);
    tokio::spawn(coordinator.clone().run(rx));

    let state = AppState {
        coordinator,
        events,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/events", post(handle_event))
        .route("/popup", get(popup_upgrade))
        .route("/host", get(host_upgrade))
        .route("/snapshot", get(handle_snapshot))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/vaults", get(get_vaults).put(put_vaults))
        .layer(cors)
        .with_state(state);

    tracing::info!(addr = %listener.local_addr()?, "omni daemon listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"invalid_settings"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Constructs a 503 error for when the event loop is gone.
fn unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "unavailable".to_string(),
        message: message.into(),
    }
}

/// Validation failures become 400 `invalid_settings`; anything else is a
/// storage problem.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<SettingsError>() {
            Some(invalid) => AppError {
                status: StatusCode::BAD_REQUEST,
                code: "invalid_settings".to_string(),
                message: invalid.to_string(),
            },
            None => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal".to_string(),
                message: format!("{:#}", err),
            },
        }
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the daemon is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

/// Handler for `GET /health`. The extension polls this to tell whether the
/// daemon is up before opening its sockets.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /events ============

/// Queues the event for the coordinator. Malformed bodies are rejected by
/// the `Json` extractor before reaching here.
async fn handle_event(
    State(state): State<AppState>,
    Json(event): Json<BrowserEvent>,
) -> Result<StatusCode, AppError> {
    state
        .events
        .send(event)
        .await
        .map_err(|_| unavailable("event loop has stopped"))?;
    Ok(StatusCode::ACCEPTED)
}

// ============ GET /snapshot ============

/// Handler for `GET /snapshot`.
///
/// Waits for the loading guard, so the response is always the result of a
/// finished run. Cycle `0` with a `null` query means nothing has run yet.
async fn handle_snapshot(State(state): State<AppState>) -> Json<Snapshot> {
    let publisher = state.coordinator.publisher();
    publisher.wait_idle().await;
    Json(publisher.snapshot().await)
}

// ============ /settings and /vaults ============

/// Handler for `GET /settings`. Defaults fill in anything never saved.
async fn get_settings(State(state): State<AppState>) -> Result<Json<Settings>, AppError> {
    Ok(Json(state.settings().settings().await?))
}

/// Handler for `PUT /settings`.
///
/// The body is a partial update; omitted fields keep their stored value.
/// The write re-triggers the last search through the storage listener.
async fn put_settings(
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<Settings>, AppError> {
    Ok(Json(state.settings().update_settings(&patch).await?))
}

/// Handler for `GET /vaults`.
async fn get_vaults(State(state): State<AppState>) -> Result<Json<Vec<Vault>>, AppError> {
    Ok(Json(state.settings().vaults().await?))
}

/// Handler for `PUT /vaults`.
///
/// Replaces the whole list. Duplicate ports or names, empty names and
/// port `0` are rejected with 400 `invalid_settings` and nothing is stored.
async fn put_vaults(
    State(state): State<AppState>,
    Json(vaults): Json<Vec<Vault>>,
) -> Result<Json<Vec<Vault>>, AppError> {
    state.settings().save_vaults(&vaults).await?;
    Ok(Json(vaults))
}

// ============ WebSockets ============

/// Upgrade handler for `GET /popup`.
async fn popup_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_popup(socket, state))
}

/// One popup connection. The publisher holds the first message until no run
/// is in flight, so a popup never renders a half-finished cycle.
async fn handle_popup(mut socket: WebSocket, state: AppState) {
    let mut port = state.coordinator.publisher().connect().await;

    loop {
        tokio::select! {
            msg = port.recv() => {
                let Some(msg) = msg else { break };
                if let Ok(json) = serde_json::to_string(&msg) {
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }

            // Popups never send anything meaningful; watch for close
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
    tracing::debug!("popup disconnected");
}

/// Upgrade handler for `GET /host`.
async fn host_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_host(socket, state))
}

/// One extension shim connection. Receives every [`HostCommand`] issued
/// after it subscribed; commands from before are not replayed.
///
/// [`HostCommand`]: crate::coordinator::HostCommand
async fn handle_host(mut socket: WebSocket, state: AppState) {
    let mut rx = state.coordinator.subscribe_host();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(command) => {
                        if let Ok(json) = serde_json::to_string(&command) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(n, "host socket lagged, skipping commands");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
