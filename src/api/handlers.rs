//! Handler bodies for the gateway's wire contract.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::crops::overlay_rules_for_crop;
use crate::types::{AcMode, Crop, Reading, Rule, Severity, StageOverrides};

use super::AppState;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<ApiError>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError::new(e.to_string())))
}

#[derive(Debug, Serialize)]
pub struct PostDataResponse {
    pub status: &'static str,
    pub triggered_rules: Vec<String>,
}

pub async fn post_data(
    State(state): State<AppState>,
    Json(reading): Json<Reading>,
) -> Result<Json<PostDataResponse>, (StatusCode, Json<ApiError>)> {
    let outcome = state
        .orchestrator
        .ingest(reading)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(ApiError::new(e.to_string()))))?;
    Ok(Json(PostDataResponse {
        status: "saved",
        triggered_rules: outcome.triggered_rules,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SensorQuery {
    pub sensor_id: String,
}

pub async fn get_data_latest(
    State(state): State<AppState>,
    Query(query): Query<SensorQuery>,
) -> Result<Json<Reading>, StatusCode> {
    state.cache.get(&query.sensor_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommandsResponse {
    pub commands: HashMap<String, String>,
}

pub async fn get_commands(
    State(state): State<AppState>,
    Query(query): Query<SensorQuery>,
) -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: state.commands.acquire_pending(&query.sensor_id),
    })
}

pub async fn get_rules(State(state): State<AppState>) -> Json<Vec<Rule>> {
    Json(state.rules.all())
}

pub async fn get_rule(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Rule>, StatusCode> {
    state.rules.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn post_rule(State(state): State<AppState>, Json(rule): Json<Rule>) -> ApiResult<Rule> {
    state.rules.upsert(rule.clone()).map_err(internal_error)?;
    Ok(Json(rule))
}

pub async fn put_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut rule): Json<Rule>,
) -> Result<Json<Rule>, (StatusCode, Json<ApiError>)> {
    if rule.id != id {
        return Err((StatusCode::BAD_REQUEST, Json(ApiError::new("path id and body id disagree"))));
    }
    rule.updated_at = Utc::now();
    state.rules.upsert(rule.clone()).map_err(internal_error)?;
    Ok(Json(rule))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    state
        .rules
        .remove(&id)
        .map_err(|e| (StatusCode::NOT_FOUND, Json(ApiError::new(e.to_string()))))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ChannelStatus {
    pub name: String,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub channels: Vec<ChannelStatus>,
    pub cooldown_seconds: u64,
    pub recent_alerts: Vec<crate::types::Alert>,
}

pub async fn get_notifications(State(state): State<AppState>) -> Json<NotificationsResponse> {
    let channels = state
        .channels
        .available_names()
        .into_iter()
        .map(|name| ChannelStatus {
            available: state.channels.is_available(name),
            name: name.to_string(),
        })
        .collect();
    Json(NotificationsResponse {
        channels,
        cooldown_seconds: crate::config::get().notifications.default_cooldown_seconds,
        recent_alerts: state.alert_history.recent(),
    })
}

#[derive(Debug, Deserialize)]
pub struct TestNotificationRequest {
    #[serde(default = "default_test_severity")]
    pub severity: Severity,
    #[serde(default = "default_test_message")]
    pub message: String,
}

fn default_test_severity() -> Severity {
    Severity::Info
}

fn default_test_message() -> String {
    "test notification".to_string()
}

pub async fn post_notifications_test(
    State(state): State<AppState>,
    Json(req): Json<TestNotificationRequest>,
) -> StatusCode {
    state.orchestrator.send_test_notification(req.severity, req.message).await;
    StatusCode::ACCEPTED
}

#[derive(Debug, Deserialize)]
pub struct AckRequest {
    pub rule_id: String,
}

pub async fn post_notifications_ack(State(state): State<AppState>, Json(req): Json<AckRequest>) -> StatusCode {
    state.escalation.acknowledge(&req.rule_id);
    if let Err(e) = state.store.acknowledge_rule(&req.rule_id).await {
        tracing::warn!(error = %e, rule_id = %req.rule_id, "failed to persist acknowledgement");
    }
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
pub struct AcZoneState {
    pub zone: String,
    pub mode: AcMode,
    pub target_temp: Option<f64>,
}

pub async fn get_ac(State(state): State<AppState>) -> Json<Vec<AcZoneState>> {
    let states = state
        .hvac
        .snapshot()
        .into_iter()
        .map(|(zone, (mode, target_temp))| AcZoneState { zone, mode, target_temp })
        .collect();
    Json(states)
}

#[derive(Debug, Deserialize)]
pub struct AcCommandRequest {
    pub zone: String,
    pub command: AcMode,
    #[serde(default)]
    pub target_temp: Option<f64>,
}

pub async fn post_ac(State(state): State<AppState>, Json(req): Json<AcCommandRequest>) -> StatusCode {
    match state.hvac.send(&req.zone, req.command, req.target_temp).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            tracing::warn!(error = %e, zone = %req.zone, "manual ac command failed");
            StatusCode::BAD_GATEWAY
        }
    }
}

pub async fn get_crops(State(state): State<AppState>) -> Json<Vec<Crop>> {
    Json(state.crops.all())
}

pub async fn post_crop(State(state): State<AppState>, Json(crop): Json<Crop>) -> ApiResult<Crop> {
    state.store.upsert_crop(&crop).await.map_err(internal_error)?;
    state.crops.upsert(crop.clone());
    Ok(Json(crop))
}

pub async fn get_crop_conditions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StageOverrides>, StatusCode> {
    let crop = state.crops.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(crop.stage_overrides))
}

pub async fn get_crop_rules(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Rule>>, StatusCode> {
    let crop = state.crops.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(overlay_rules_for_crop(&crop)))
}

#[derive(Debug, Serialize)]
pub struct StageAdvanceResponse {
    pub crop_id: String,
    pub from_stage: String,
    pub to_stage: String,
}

pub async fn post_crop_advance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StageAdvanceResponse>, StatusCode> {
    let advance = state.crops.advance(&id, Utc::now()).ok_or(StatusCode::NOT_FOUND)?;
    if let Some(crop) = state.crops.get(&id) {
        let _ = state.store.upsert_crop(&crop).await;
    }
    let _ = state
        .store
        .record_event("stage_advance", &format!("{} {} -> {}", advance.crop_id, advance.from_stage, advance.to_stage))
        .await;
    Ok(Json(StageAdvanceResponse {
        crop_id: advance.crop_id,
        from_stage: advance.from_stage,
        to_stage: advance.to_stage,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HarvestRequest {
    pub yield_grams: Option<f64>,
    pub notes: Option<String>,
}

pub async fn post_crop_harvest(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<HarvestRequest>,
) -> Result<Json<crate::types::Harvest>, StatusCode> {
    let harvest = state
        .crops
        .harvest(&id, req.yield_grams, req.notes, Utc::now())
        .ok_or(StatusCode::NOT_FOUND)?;
    let _ = state.store.record_harvest(&harvest).await;
    if let Some(crop) = state.crops.get(&id) {
        let _ = state.store.upsert_crop(&crop).await;
    }
    Ok(Json(harvest))
}

#[derive(Debug, Serialize)]
pub struct CalibrationDue {
    pub sensor_id: String,
    pub field: String,
}

pub async fn get_calibrations_due(State(state): State<AppState>) -> ApiResult<Vec<CalibrationDue>> {
    let due = state.store.calibrations_due(Utc::now()).await.map_err(internal_error)?;
    Ok(Json(
        due.into_iter().map(|(sensor_id, field)| CalibrationDue { sensor_id, field }).collect(),
    ))
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Thin stub: full documentation serving is outside this gateway's scope,
/// but `/api/docs` and `/api/openapi.json` are public per the auth contract
/// so a reverse proxy can front them without a key.
pub async fn docs() -> &'static str {
    "see project README for the wire contract"
}

pub async fn openapi() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "openapi": "3.0.0", "info": { "title": "hydroponics gateway", "version": "0.1.0" } }))
}
