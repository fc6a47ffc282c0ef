//! REST API for the operator surface.
//!
//! Exposes actuator state and manual overrides, decision history, alerts,
//! the automation toggle, mode and threshold configuration, and a sync
//! status summary. Threshold updates are validated here; an invalid set is
//! rejected with 422 and never reaches the control engine.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use myco_ledger::AlertFilter;
use myco_types::{
    ActuatorState, Alert, Decision, EntityType, Mode, ThresholdTable, TriggeredBy,
};

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        // Actuators and manual override
        .route("/api/actuators", get(list_actuators))
        .route(
            "/api/actuators/{name}",
            post(set_actuator).delete(clear_override),
        )
        // History and alerts
        .route("/api/decisions", get(get_decisions))
        .route("/api/alerts", get(get_alerts))
        .route("/api/alerts/{fingerprint}/ack", post(acknowledge_alert))
        // Control configuration
        .route("/api/automation", get(get_automation).post(set_automation))
        .route("/api/mode", get(get_mode).put(set_mode))
        .route("/api/thresholds", get(get_thresholds).put(set_thresholds))
        // Sync visibility
        .route("/api/sync/status", get(sync_status))
}

/// API error with an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Request payload failed validation.
    #[error("{0}")]
    Unprocessable(String),

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<myco_ledger::Error> for ApiError {
    fn from(e: myco_ledger::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<myco_control::ActuatorError> for ApiError {
    fn from(e: myco_control::ActuatorError) -> Self {
        match e {
            myco_control::ActuatorError::Unknown(name) => {
                ApiError::NotFound(format!("unknown actuator: {name}"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

async fn list_actuators(State(state): State<Arc<AppState>>) -> Json<Vec<ActuatorState>> {
    Json(state.bank.snapshot().await)
}

/// Manual override request body.
#[derive(Debug, Deserialize)]
pub struct SetActuatorRequest {
    /// Desired state.
    pub on: bool,
}

/// Apply a manual override, write-ahead included.
async fn set_actuator(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<SetActuatorRequest>,
) -> Result<Json<Vec<ActuatorState>>, ApiError> {
    let now = OffsetDateTime::now_utc();

    let Some(change) = state
        .bank
        .plan(&name, body.on, TriggeredBy::Manual, now)
        .await?
    else {
        return Err(ApiError::Internal(
            "manual command produced no change".to_string(),
        ));
    };

    {
        let ledger = state.ledger.lock().await;
        ledger.append(EntityType::ActuatorChange, &change, now)?;
    }
    state.bank.apply(&change).await?;
    state.sync_notify.notify_one();

    info!(actuator = %name, on = body.on, "manual override applied");
    Ok(Json(state.bank.snapshot().await))
}

/// Clear a manual override; automatic control resumes next tick.
async fn clear_override(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cleared = state.bank.clear_override(&name).await?;
    Ok(Json(serde_json::json!({ "cleared": cleared })))
}

/// Query parameters for decision history.
#[derive(Debug, Deserialize)]
pub struct DecisionQuery {
    /// Maximum decisions to return (default 50, capped at 500).
    pub limit: Option<u64>,
}

async fn get_decisions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DecisionQuery>,
) -> Result<Json<Vec<Decision>>, ApiError> {
    let limit = query.limit.unwrap_or(50).min(500);
    let ledger = state.ledger.lock().await;
    Ok(Json(ledger.recent_decisions(limit)?))
}

/// Query parameters for the alert list.
#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    /// `open` (default), `acknowledged`, `resolved`, or `all`.
    pub state: Option<String>,
}

async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertQuery>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let filter = match query.state.as_deref() {
        None | Some("open") => AlertFilter::Open,
        Some("acknowledged") => AlertFilter::Acknowledged,
        Some("resolved") => AlertFilter::Resolved,
        Some("all") => AlertFilter::All,
        Some(other) => {
            return Err(ApiError::Unprocessable(format!(
                "unknown alert state '{other}'"
            )));
        }
    };
    let ledger = state.ledger.lock().await;
    Ok(Json(ledger.list_alerts(filter)?))
}

async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(fingerprint): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let acknowledged = {
        let ledger = state.ledger.lock().await;
        ledger.acknowledge_alert(&fingerprint)?
    };
    if !acknowledged {
        return Err(ApiError::NotFound(format!(
            "no open alert with fingerprint {fingerprint}"
        )));
    }
    Ok(Json(serde_json::json!({ "acknowledged": true })))
}

/// Automation toggle body and response.
#[derive(Debug, Serialize, Deserialize)]
pub struct AutomationBody {
    /// Whether the control engine runs.
    pub enabled: bool,
}

async fn get_automation(State(state): State<Arc<AppState>>) -> Json<AutomationBody> {
    Json(AutomationBody {
        enabled: state.automation_enabled(),
    })
}

async fn set_automation(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AutomationBody>,
) -> Json<AutomationBody> {
    state.set_automation(body.enabled);
    Json(AutomationBody {
        enabled: state.automation_enabled(),
    })
}

/// Mode body and response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModeBody {
    /// Cultivation phase.
    pub mode: Mode,
}

async fn get_mode(State(state): State<Arc<AppState>>) -> Json<ModeBody> {
    Json(ModeBody {
        mode: *state.mode.read().await,
    })
}

async fn set_mode(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ModeBody>,
) -> Json<ModeBody> {
    *state.mode.write().await = body.mode;
    info!(mode = %body.mode, "mode changed");
    Json(ModeBody { mode: body.mode })
}

async fn get_thresholds(State(state): State<Arc<AppState>>) -> Json<ThresholdTable> {
    Json(state.config.read().await.thresholds.clone())
}

/// Replace the threshold table. Invalid sets never reach the engine.
async fn set_thresholds(
    State(state): State<Arc<AppState>>,
    Json(table): Json<ThresholdTable>,
) -> Result<Json<ThresholdTable>, ApiError> {
    table
        .validate()
        .map_err(|e| ApiError::Unprocessable(e.to_string()))?;

    let mut config = state.config.write().await;
    config.thresholds = table.clone();
    info!("threshold table updated");
    Ok(Json(table))
}

/// Sync status summary.
#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    /// Whether a remote endpoint is configured.
    pub enabled: bool,
    /// Per-status entry counts.
    pub counts: myco_ledger::StatusCounts,
}

async fn sync_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let enabled = state.config.read().await.sync.enabled();
    let counts = {
        let ledger = state.ledger.lock().await;
        ledger.counts()?
    };
    Ok(Json(SyncStatusResponse { enabled, counts }))
}
