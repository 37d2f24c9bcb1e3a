//! HTTP API over the environment engine.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /environments` - List environment snapshots
//! - `POST /environments` - Start an environment (202 with the initial snapshot)
//! - `GET /environments/:name` - Environment snapshot
//! - `POST /environments/:name/stop` - Stop an environment
//! - `POST /environments/:name/cancel` - Cancel a start in progress
//! - `POST /environments/:name/machines/:machine/restart` - Restart one machine
//! - `GET /environments/:name/events` - SSE stream of environment events

use crate::types::{CancelResult, EnvironmentList, ErrorBody, HealthResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use corral_core::{CoreError, EnvironmentDescriptor, EnvironmentEngine, EnvironmentEvent};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Engine error rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            CoreError::Validation(_)
            | CoreError::Cycle(_)
            | CoreError::UnsupportedEnvironmentType(_) => StatusCode::BAD_REQUEST,
            CoreError::UnknownEnvironment(_) | CoreError::UnknownMachine { .. } => {
                StatusCode::NOT_FOUND
            }
            CoreError::AlreadyStarting(_) | CoreError::NotRunning { .. } | CoreError::Cancelled(_) => {
                StatusCode::CONFLICT
            }
            CoreError::Start { .. } | CoreError::Stop { .. } | CoreError::Destroy { .. } => {
                StatusCode::BAD_GATEWAY
            }
            CoreError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, "Request rejected");
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Build the HTTP router for the engine.
///
/// The returned router can be served directly with axum or composed
/// into a larger application.
pub fn build_router(engine: EnvironmentEngine) -> Router {
    tracing::debug!("Building HTTP router");

    Router::new()
        .route("/health", get(health_handler))
        .route("/environments", get(list_handler).post(start_handler))
        .route("/environments/:name", get(get_handler))
        .route("/environments/:name/stop", post(stop_handler))
        .route("/environments/:name/cancel", post(cancel_handler))
        .route(
            "/environments/:name/machines/:machine/restart",
            post(restart_handler),
        )
        .route("/environments/:name/events", get(events_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Health check endpoint.
async fn health_handler(State(engine): State<EnvironmentEngine>) -> Json<HealthResult> {
    tracing::trace!("Health check request");
    let shutting_down = engine.is_shutting_down();
    Json(HealthResult {
        status: if shutting_down { "shutting_down" } else { "healthy" }.to_string(),
        service: "corral-server".to_string(),
        environment_types: engine.environment_types(),
        shutting_down,
    })
}

async fn list_handler(State(engine): State<EnvironmentEngine>) -> Json<EnvironmentList> {
    Json(EnvironmentList {
        environments: engine.list_environments().await,
    })
}

/// Start an environment; orchestration continues in the background.
async fn start_handler(
    State(engine): State<EnvironmentEngine>,
    Json(descriptor): Json<EnvironmentDescriptor>,
) -> ApiResult<impl IntoResponse> {
    let handle = engine.start_environment(descriptor).await?;
    let name = handle.environment().to_string();

    tokio::spawn(async move {
        let environment = handle.environment().to_string();
        match handle.wait().await {
            Ok(_) => tracing::debug!(%environment, "Background start finished"),
            Err(e) => tracing::debug!(%environment, error = %e, "Background start failed"),
        }
    });

    let snapshot = engine
        .environment_state(&name)
        .await
        .ok_or(CoreError::UnknownEnvironment(name))?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

async fn get_handler(
    State(engine): State<EnvironmentEngine>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = engine
        .environment_state(&name)
        .await
        .ok_or(CoreError::UnknownEnvironment(name))?;
    Ok(Json(snapshot))
}

async fn stop_handler(
    State(engine): State<EnvironmentEngine>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(engine.stop_environment(&name).await?))
}

async fn cancel_handler(
    State(engine): State<EnvironmentEngine>,
    Path(name): Path<String>,
) -> ApiResult<Json<CancelResult>> {
    let cancelled = engine.cancel_start(&name).await?;
    Ok(Json(CancelResult { cancelled }))
}

async fn restart_handler(
    State(engine): State<EnvironmentEngine>,
    Path((name, machine)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(engine.restart_machine(&name, &machine).await?))
}

/// Stream events of one environment until the engine goes away.
async fn events_handler(
    State(engine): State<EnvironmentEngine>,
    Path(name): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(environment = %name, "Event stream opened");
    let subscription = engine.subscribe(&name);

    let events = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        Some((Ok::<_, Infallible>(sse_event(&event)), subscription))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn sse_event(event: &EnvironmentEvent) -> Event {
    let kind = match event {
        EnvironmentEvent::MachineStateChanged { .. } => "machine_state_changed",
        EnvironmentEvent::Finished { .. } => "finished",
        EnvironmentEvent::StatusChanged { .. } => "status_changed",
    };
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to serialize event");
        serde_json::json!({ "error": e.to_string() }).to_string()
    });
    Event::default().event(kind).data(data)
}

/// Start the HTTP server.
///
/// This function runs until the server is shut down via the provided
/// shutdown signal.
pub async fn serve(
    engine: EnvironmentEngine,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let router = build_router(engine);

    tracing::info!(%addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!(%addr, "TCP listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
