// ABOUTME: HTTP routes: health, stats, per-worker lifecycle, simulator data, MIB reload.
// ABOUTME: Handlers are thin wrappers over the control plane.

use crate::auth::require_token;
use crate::server::AppState;
use crate::ws::ws_handler;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, Request, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use trishul_core::error::ControlError;
use trishul_core::{ConfigOverrides, StartOutcome, StatsDocument, WorkerKind};

/// Full application router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/stats", get(stats))
        .nest("/simulator", worker_routes(WorkerKind::Simulator).merge(data_routes()))
        .nest("/traps", worker_routes(WorkerKind::Traps))
        .route("/mibs/reload", post(reload_mibs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let api = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .merge(protected);

    Router::new().nest("/api", api).with_state(state)
}

fn worker_routes(kind: WorkerKind) -> Router<AppState> {
    Router::new()
        .route(
            "/status",
            get(move |State(state): State<AppState>| async move {
                Json(state.control.status(kind).await)
            }),
        )
        .route(
            "/start",
            post(
                move |State(state): State<AppState>, Overrides(overrides): Overrides| async move {
                    start_response(state.control.start(kind, overrides.as_ref()).await)
                },
            ),
        )
        .route(
            "/stop",
            post(move |State(state): State<AppState>| async move {
                Json(state.control.stop(kind).await)
            }),
        )
        .route(
            "/restart",
            post(
                move |State(state): State<AppState>, Overrides(overrides): Overrides| async move {
                    start_response(state.control.restart(kind, overrides.as_ref()).await)
                },
            ),
        )
}

fn data_routes() -> Router<AppState> {
    Router::new().route("/data", get(simulator_data).post(update_simulator_data))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn stats(State(state): State<AppState>) -> Json<StatsDocument> {
    Json(state.control.stats())
}

async fn simulator_data(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.control.simulator_data().await?))
}

async fn update_simulator_data(
    State(state): State<AppState>,
    Json(data): Json<Value>,
) -> Result<Response, ApiError> {
    let update = state.control.update_simulator_data(&data).await?;
    Ok(Json(update).into_response())
}

async fn reload_mibs(State(state): State<AppState>) -> Result<Response, ApiError> {
    let outcome = state.control.reload_definitions().await?;
    Ok(Json(outcome).into_response())
}

/// Optional start overrides. An empty body means none; a body that is not a
/// valid overrides object is rejected with 400.
struct Overrides(Option<ConfigOverrides>);

#[async_trait]
impl<S: Send + Sync> FromRequest<S> for Overrides {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(None));
        }
        serde_json::from_slice(&body)
            .map(|overrides| Self(Some(overrides)))
            .map_err(|e| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Invalid overrides: {e}") })),
                )
                    .into_response()
            })
    }
}

/// Failed launches are reported with a 500 so the initiating caller sees them.
fn start_response(outcome: StartOutcome) -> Response {
    let status = match outcome {
        StartOutcome::Error { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    (status, Json(outcome)).into_response()
}

/// Control-plane failure rendered as a JSON error body.
pub struct ApiError(ControlError);

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.0, "Request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}
