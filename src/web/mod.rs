mod events;

pub use events::{BroadcastObserver, CityEvent};

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{broadcast, watch},
};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{error, info};

use crate::{
    city::{CityError, CityState},
    config::GameConfig,
    serial::{ConnectionStatus, RecordOutcome, SerialInputDecoder, SerialLink, SharedCity},
    snapshot::{CitySnapshot, SnapshotWriter},
};

#[derive(Clone)]
pub struct AppState {
    city: SharedCity,
    decoder: Arc<Mutex<SerialInputDecoder>>,
    events: broadcast::Sender<String>,
    serial_status: watch::Receiver<ConnectionStatus>,
    snapshots: Arc<SnapshotWriter>,
}

impl AppState {
    pub fn new(config: &GameConfig, serial_status: watch::Receiver<ConnectionStatus>) -> Self {
        let (events, _) = broadcast::channel::<String>(512);
        let city = CityState::new().with_observer(BroadcastObserver::new(events.clone()));
        let mut decoder = SerialInputDecoder::with_max_line_bytes(config.serial.max_line_bytes);
        decoder.open();
        Self {
            city: Arc::new(Mutex::new(city)),
            decoder: Arc::new(Mutex::new(decoder)),
            events,
            serial_status,
            snapshots: Arc::new(SnapshotWriter::new(
                &config.snapshot.output_dir,
                config.snapshot.interval_turns,
            )),
        }
    }

    pub fn city(&self) -> SharedCity {
        self.city.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    fn lock_city(&self) -> Result<MutexGuard<'_, CityState>, ApiError> {
        self.city.lock().map_err(|_| ApiError::Poisoned)
    }
}

#[derive(Debug)]
pub enum ApiError {
    GameOver,
    City(CityError),
    Snapshot(anyhow::Error),
    Poisoned,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::GameOver => (
                StatusCode::CONFLICT,
                "the game has ended; reset to play again".to_string(),
            ),
            ApiError::City(err) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
            ApiError::Snapshot(err) => {
                error!("snapshot failed: {err:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
            }
            ApiError::Poisoned => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "city state lock poisoned".to_string(),
            ),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<CityError> for ApiError {
    fn from(value: CityError) -> Self {
        ApiError::City(value)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
pub struct StateEnvelope {
    pub city: CitySnapshot,
    pub serial: ConnectionStatus,
}

#[derive(Debug, Deserialize)]
pub struct PlaceRequest {
    pub x: i32,
    pub z: i32,
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    pub x: i32,
    pub z: i32,
}

#[derive(Debug, Deserialize)]
pub struct SerialRequest {
    pub data: String,
}

#[derive(Serialize)]
struct SerialResponse {
    outcomes: Vec<String>,
    city: CitySnapshot,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/state", get(latest_state))
        .route("/api/place", post(place))
        .route("/api/clear", post(clear))
        .route("/api/end-turn", post(end_turn))
        .route("/api/reset", post(reset))
        .route("/api/serial", post(serial_input))
        .route("/api/events", get(stream_events))
        .with_state(state)
}

pub async fn run(config: GameConfig) -> Result<()> {
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Idle);
    let state = AppState::new(&config, status_rx);

    let serial_task = config.serial.source().map(|source| {
        let link = SerialLink::new(
            source,
            SerialInputDecoder::with_max_line_bytes(config.serial.max_line_bytes),
            state.city(),
            status_tx,
            Duration::from_millis(config.serial.reconnect_delay_ms),
        );
        tokio::spawn(link.run())
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, serial = serial_task.is_some(), "ecocity control server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = serial_task {
        task.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down control server");
}

fn envelope(state: &AppState, city: &CityState) -> StateEnvelope {
    StateEnvelope {
        city: CitySnapshot::capture(city),
        serial: state.serial_status.borrow().clone(),
    }
}

fn ensure_running(city: &CityState) -> Result<(), ApiError> {
    if city.metrics().game_over {
        Err(ApiError::GameOver)
    } else {
        Ok(())
    }
}

async fn latest_state(State(state): State<AppState>) -> Result<Json<StateEnvelope>, ApiError> {
    let city = state.lock_city()?;
    Ok(Json(envelope(&state, &city)))
}

async fn place(
    State(state): State<AppState>,
    Json(request): Json<PlaceRequest>,
) -> Result<Json<StateEnvelope>, ApiError> {
    let mut city = state.lock_city()?;
    ensure_running(&city)?;
    city.place_building_named(request.x, request.z, &request.kind)?;
    Ok(Json(envelope(&state, &city)))
}

async fn clear(
    State(state): State<AppState>,
    Json(request): Json<ClearRequest>,
) -> Result<Json<StateEnvelope>, ApiError> {
    let mut city = state.lock_city()?;
    ensure_running(&city)?;
    city.clear_cell(request.x, request.z)?;
    Ok(Json(envelope(&state, &city)))
}

async fn end_turn(State(state): State<AppState>) -> Result<Json<StateEnvelope>, ApiError> {
    let mut city = state.lock_city()?;
    ensure_running(&city)?;
    city.end_turn();
    state
        .snapshots
        .maybe_write(&city)
        .map_err(ApiError::Snapshot)?;
    Ok(Json(envelope(&state, &city)))
}

async fn reset(State(state): State<AppState>) -> Result<Json<StateEnvelope>, ApiError> {
    let mut city = state.lock_city()?;
    city.reset_game_state();
    // A record left half-typed before the reset must not leak into the new game.
    state
        .decoder
        .lock()
        .map_err(|_| ApiError::Poisoned)?
        .open();
    Ok(Json(envelope(&state, &city)))
}

async fn serial_input(
    State(state): State<AppState>,
    Json(request): Json<SerialRequest>,
) -> Result<Json<SerialResponse>, ApiError> {
    let mut city = state.lock_city()?;
    ensure_running(&city)?;
    let outcomes = {
        let mut decoder = state.decoder.lock().map_err(|_| ApiError::Poisoned)?;
        decoder.feed(&request.data, &mut city)
    };
    Ok(Json(SerialResponse {
        outcomes: outcomes.iter().map(describe_outcome).collect(),
        city: CitySnapshot::capture(&city),
    }))
}

fn describe_outcome(outcome: &RecordOutcome) -> String {
    match outcome {
        RecordOutcome::Placed { x, z, kind } => format!("placed {kind} at ({x}, {z})"),
        RecordOutcome::Cleared { x, z } => format!("cleared ({x}, {z})"),
        RecordOutcome::AlreadyEmpty { x, z } => format!("({x}, {z}) already empty"),
        RecordOutcome::Rejected(err) => format!("rejected: {err}"),
        RecordOutcome::Dropped(err) => format!("dropped: {err}"),
    }
}

async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(payload) => Some(Ok(Event::default().data(payload))),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(2))
            .text("keep-alive"),
    )
}
