//! HTTP and WebSocket server.
//!
//! This module provides the service surface around the pipeline:
//! - Anchors report readings via POST /api/reading/ble
//! - Observers stream positions over GET /ws/position
//! - Tag commands are dispatched via POST /api/tags/{tag_id}/alarm
//!
//! # Architecture
//!
//! ```text
//! anchors ──→ POST /api/reading/ble ──→ ReadingBuffer
//!                                           │ (tick)
//!                                           ▼
//!                              AggregationScheduler ──→ BroadcastHub ──→ /ws/position
//! ```

use crate::anchors::AnchorRegistry;
use crate::broadcast::{BroadcastHub, InitialSetup, Subscription, DEFAULT_QUEUE_CAPACITY};
use crate::command::{CommandDispatcher, LoggingDispatcher, TagCommand};
use crate::config::Config;
use crate::core::cooldown::CooldownPhase;
use crate::core::types::{Reading, DEFAULT_TAG_ID};
use crate::scheduler::{AggregationScheduler, PipelineConfig};
use crate::stats::StatsSnapshot;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub host: String,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Static anchor layout
    pub registry: AnchorRegistry,
    /// Pipeline tuning
    pub pipeline: PipelineConfig,
    /// Tag assumed when a reading does not name one
    pub default_tag_id: String,
    /// Per-subscriber queue depth
    pub subscriber_queue: usize,
    /// Upper bound on a single WebSocket write
    pub send_timeout: Duration,
    /// Transport for out-of-band tag commands
    pub dispatcher: Arc<dyn CommandDispatcher>,
}

impl ServerConfig {
    /// Create a new server configuration with default pipeline settings
    pub fn new(port: u16, registry: AnchorRegistry) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
            registry,
            pipeline: PipelineConfig::default(),
            default_tag_id: DEFAULT_TAG_ID.to_string(),
            subscriber_queue: DEFAULT_QUEUE_CAPACITY,
            send_timeout: Duration::from_secs(2),
            dispatcher: Arc::new(LoggingDispatcher),
        }
    }

    /// Build a server configuration from the service configuration
    pub fn from_config(config: &Config, registry: AnchorRegistry) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            registry,
            pipeline: config.pipeline(),
            default_tag_id: config.default_tag_id.clone(),
            subscriber_queue: config.subscriber_queue,
            send_timeout: config.subscriber_send_timeout,
            dispatcher: Arc::new(LoggingDispatcher),
        }
    }

    /// Use a specific command transport
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Use specific pipeline settings
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }
}

/// Shared server state
pub struct ServerState {
    /// Aggregation pipeline (owns buffer, gate and hub)
    scheduler: Arc<AggregationScheduler>,
    /// Command transport
    dispatcher: Arc<dyn CommandDispatcher>,
    /// Tag assumed when a reading does not name one
    default_tag_id: String,
    /// Upper bound on a single WebSocket write
    send_timeout: Duration,
    /// Process start, for uptime
    started: Instant,
}

impl ServerState {
    /// Create new server state
    pub fn new(config: &ServerConfig) -> Self {
        let registry = Arc::new(config.registry.clone());
        let hub = Arc::new(BroadcastHub::with_capacity(
            &registry,
            config.subscriber_queue,
        ));

        Self {
            scheduler: Arc::new(AggregationScheduler::new(config.pipeline, registry, hub)),
            dispatcher: config.dispatcher.clone(),
            default_tag_id: config.default_tag_id.clone(),
            send_timeout: config.send_timeout,
            started: Instant::now(),
        }
    }

    pub fn scheduler(&self) -> &Arc<AggregationScheduler> {
        &self.scheduler
    }
}

/// Reading reported by an anchor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BleReading {
    /// Tag that was heard (defaults to the configured tag)
    #[serde(default)]
    pub tag_id: Option<String>,
    /// Anchor that heard it
    pub anchor_id: String,
    /// Received signal strength in dBm
    pub rssi: i32,
}

/// Response from ingest endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    /// False when the reading was dropped during cooldown
    pub buffered: bool,
}

/// Response from alarm endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmResponse {
    pub status: String,
    pub tag_id: String,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_s: f64,
    pub ws_clients: usize,
    pub anchors_count: usize,
    pub cooldown: CooldownPhase,
    pub buffered_readings: usize,
    pub stats: StatsSnapshot,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// GET /health
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let scheduler = &state.scheduler;
    let anchors_count = scheduler.registry().len();

    Json(HealthResponse {
        // Without anchors the service stays up but can never produce a fix.
        status: if anchors_count > 0 { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_s: (state.started.elapsed().as_secs_f64() * 10.0).round() / 10.0,
        ws_clients: scheduler.hub().subscriber_count().await,
        anchors_count,
        cooldown: scheduler.phase().await,
        buffered_readings: scheduler.buffered_readings().await,
        stats: scheduler.stats().snapshot(),
    })
}

/// POST /api/reading/ble
///
/// Always acknowledged; readings arriving during cooldown are dropped.
async fn ingest_reading(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<BleReading>,
) -> Json<IngestResponse> {
    let tag_id = body
        .tag_id
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| state.default_tag_id.clone());

    let outcome = state
        .scheduler
        .ingest(Reading::for_tag(tag_id, body.anchor_id, body.rssi))
        .await;

    Json(IngestResponse {
        status: "ok".to_string(),
        buffered: outcome.is_buffered(),
    })
}

/// GET /api/anchors
async fn anchors(State(state): State<Arc<ServerState>>) -> Json<InitialSetup> {
    Json(state.scheduler.hub().initial_setup().clone())
}

/// POST /api/tags/{tag_id}/alarm
async fn trigger_alarm(
    State(state): State<Arc<ServerState>>,
    Path(tag_id): Path<String>,
) -> Result<Json<AlarmResponse>, (StatusCode, Json<ErrorResponse>)> {
    let command = TagCommand::toggle_buzzer(tag_id.clone());

    state.dispatcher.dispatch(&command).map_err(|e| {
        tracing::error!(tag = %tag_id, "Failed to dispatch alarm: {}", e);
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
                code: "DISPATCH_ERROR".to_string(),
            }),
        )
    })?;

    Ok(Json(AlarmResponse {
        status: "command sent".to_string(),
        tag_id,
    }))
}

/// GET /ws/position
async fn ws_position(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_subscriber(socket, state))
}

/// Pump hub messages into one socket until either side goes away.
async fn handle_subscriber(mut socket: WebSocket, state: Arc<ServerState>) {
    let hub = state.scheduler.hub().clone();
    let Subscription { id, mut receiver } = hub.subscribe().await;

    loop {
        tokio::select! {
            outgoing = receiver.recv() => {
                let Some(text) = outgoing else {
                    // Dropped by the hub after a failed delivery.
                    break;
                };
                match tokio::time::timeout(state.send_timeout, socket.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(subscriber = %id, "WebSocket send failed: {}", e);
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(subscriber = %id, "WebSocket send timed out");
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {} // client messages are ignored
                }
            }
        }
    }

    hub.unsubscribe(id).await;
}

/// Build the router for `state`
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/reading/ble", post(ingest_reading))
        .route("/api/anchors", get(anchors))
        .route("/api/tags/:tag_id/alarm", post(trigger_alarm))
        .route("/ws/position", get(ws_position))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the server and the aggregation scheduler
pub async fn run(config: ServerConfig) -> anyhow::Result<(SocketAddr, oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config));
    let scheduler = state.scheduler.clone();
    let app = router(state);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Beacon tracker listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(scheduler.clone().run(stop_rx));

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
                let _ = stop_tx.send(true);
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
        tracing::info!("{}", scheduler.stats().summary());
    });

    Ok((actual_addr, shutdown_tx))
}
