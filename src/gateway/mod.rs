//! Axum HTTP surface for the back office.
//!
//! Thin controllers: each handler shuttles parameters into
//! [`MobileService`] or the [`AutoCancelScheduler`] and forwards errors with
//! the status code the error taxonomy assigned.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::scheduler::{AutoCancelScheduler, RunTrigger, SchedulerError};
use crate::widely::{EndpointId, MobileService, RemoteResult, WidelyError};

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout. Covers one upstream round trip plus slack; manual
/// scheduler runs are exempt.
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub mobile: Arc<MobileService>,
    pub scheduler: Arc<AutoCancelScheduler>,
}

// ── Errors ───────────────────────────────────────────────────────

/// Error response: `{"error": message}` with the taxonomy's status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<WidelyError> for ApiError {
    fn from(err: WidelyError) -> Self {
        Self {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.to_string(),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        let status = match err {
            SchedulerError::AlreadyRunning => StatusCode::CONFLICT,
            SchedulerError::Scan(_) | SchedulerError::InvalidSchedule(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = self.status.as_u16(), error = %self.message, "Request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn action_response(result: RemoteResult) -> ApiResult {
    Ok(Json(serde_json::to_value(result).unwrap_or(Value::Null)))
}

// ── Request bodies ───────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EndpointBody {
    pub endpoint_id: Option<EndpointId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SimNumberBody {
    #[serde(rename = "simNumber")]
    pub sim_number: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DomainUserBody {
    pub domain_user_id: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PackagesBody {
    /// Comma-separated package types, e.g. `"base"` or `"base,addon"`.
    pub package_types: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NetworkBody {
    pub endpoint_id: Option<EndpointId>,
    pub network: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImeiBody {
    pub endpoint_id: Option<EndpointId>,
    pub imei: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PackageChangeBody {
    pub endpoint_id: Option<EndpointId>,
    pub package_id: Option<i64>,
}

// ── Router ───────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    let widely = Router::new()
        .route("/api/widely/search-users", post(handle_search_users))
        .route("/api/widely/mobiles", post(handle_get_mobiles))
        .route("/api/widely/mobile-info", post(handle_mobile_info))
        .route("/api/widely/packages", post(handle_packages))
        .route("/api/widely/terminate", post(handle_terminate))
        .route("/api/widely/reset-voicemail", post(handle_reset_voicemail))
        .route("/api/widely/send-apn", post(handle_send_apn))
        .route("/api/widely/network", post(handle_change_network))
        .route("/api/widely/freeze", post(handle_freeze))
        .route("/api/widely/unfreeze", post(handle_unfreeze))
        .route("/api/widely/lock-imei", post(handle_lock_imei))
        .route("/api/widely/unlock-imei", post(handle_unlock_imei))
        .route("/api/widely/package", post(handle_change_package))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ));

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/scheduler/auto-cancel/run", post(handle_auto_cancel_run))
        .route(
            "/api/scheduler/auto-cancel/status",
            get(handle_auto_cancel_status),
        )
        .merge(widely)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
}

/// Serve until `shutdown` flips to true.
pub async fn run_gateway(
    host: &str,
    port: u16,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Gateway listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "auto_cancel_running": state.scheduler.is_running(),
    }))
}

async fn handle_search_users(
    State(state): State<AppState>,
    Json(body): Json<SimNumberBody>,
) -> ApiResult {
    Ok(Json(state.mobile.search_users(body.sim_number.as_deref()).await?))
}

async fn handle_get_mobiles(
    State(state): State<AppState>,
    Json(body): Json<DomainUserBody>,
) -> ApiResult {
    Ok(Json(state.mobile.get_mobiles(body.domain_user_id.as_ref()).await?))
}

async fn handle_mobile_info(
    State(state): State<AppState>,
    Json(body): Json<EndpointBody>,
) -> ApiResult {
    Ok(Json(state.mobile.get_mobile_info(body.endpoint_id.as_ref()).await?))
}

async fn handle_packages(
    State(state): State<AppState>,
    Json(body): Json<PackagesBody>,
) -> ApiResult {
    Ok(Json(
        state
            .mobile
            .get_packages_with_info(body.package_types.as_deref())
            .await?,
    ))
}

async fn handle_terminate(
    State(state): State<AppState>,
    Json(body): Json<EndpointBody>,
) -> ApiResult {
    action_response(state.mobile.terminate_mobile(body.endpoint_id.as_ref()).await?)
}

async fn handle_reset_voicemail(
    State(state): State<AppState>,
    Json(body): Json<EndpointBody>,
) -> ApiResult {
    action_response(state.mobile.reset_voicemail_pin(body.endpoint_id.as_ref()).await?)
}

async fn handle_send_apn(
    State(state): State<AppState>,
    Json(body): Json<EndpointBody>,
) -> ApiResult {
    action_response(state.mobile.send_apn(body.endpoint_id.as_ref()).await?)
}

async fn handle_change_network(
    State(state): State<AppState>,
    Json(body): Json<NetworkBody>,
) -> ApiResult {
    action_response(
        state
            .mobile
            .change_network(body.endpoint_id.as_ref(), body.network.as_deref())
            .await?,
    )
}

async fn handle_freeze(
    State(state): State<AppState>,
    Json(body): Json<EndpointBody>,
) -> ApiResult {
    action_response(state.mobile.set_frozen(body.endpoint_id.as_ref(), true).await?)
}

async fn handle_unfreeze(
    State(state): State<AppState>,
    Json(body): Json<EndpointBody>,
) -> ApiResult {
    action_response(state.mobile.set_frozen(body.endpoint_id.as_ref(), false).await?)
}

async fn handle_lock_imei(
    State(state): State<AppState>,
    Json(body): Json<ImeiBody>,
) -> ApiResult {
    action_response(
        state
            .mobile
            .lock_imei(body.endpoint_id.as_ref(), body.imei.as_deref())
            .await?,
    )
}

async fn handle_unlock_imei(
    State(state): State<AppState>,
    Json(body): Json<EndpointBody>,
) -> ApiResult {
    action_response(state.mobile.unlock_imei(body.endpoint_id.as_ref()).await?)
}

async fn handle_change_package(
    State(state): State<AppState>,
    Json(body): Json<PackageChangeBody>,
) -> ApiResult {
    action_response(
        state
            .mobile
            .change_package(body.endpoint_id.as_ref(), body.package_id)
            .await?,
    )
}

/// POST /api/scheduler/auto-cancel/run
///
/// Manual trigger; shares the overlap guard with the cron loop.
async fn handle_auto_cancel_run(State(state): State<AppState>) -> ApiResult {
    tracing::info!("Manual auto-cancel run requested");
    let summary = state.scheduler.run_once(RunTrigger::Manual).await?;
    Ok(Json(serde_json::to_value(summary).unwrap_or(Value::Null)))
}

/// GET /api/scheduler/auto-cancel/status
async fn handle_auto_cancel_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.status())
}
