//! Health and state handlers

use crate::api::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    Json,
};
use corral_coordinator::{AgentSnapshot, FrameworkSnapshot, StateSnapshot};
use corral_types::{AgentId, FrameworkId};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub leader: bool,
    pub active_agents: usize,
    pub frameworks: usize,
}

/// Liveness and leadership
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthCheckResponse>> {
    let snapshot = state.coordinator.snapshot().await?;
    let status = if snapshot.leader { "healthy" } else { "deposed" };

    Ok(Json(HealthCheckResponse {
        status: status.to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        leader: snapshot.leader,
        active_agents: snapshot.active_agents(),
        frameworks: snapshot.frameworks.len(),
    }))
}

/// Full coordinator state
pub async fn get_state(State(state): State<AppState>) -> ApiResult<Json<StateSnapshot>> {
    Ok(Json(state.coordinator.snapshot().await?))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AgentSnapshot>> {
    let snapshot = state.coordinator.snapshot().await?;
    snapshot
        .agent(&AgentId::new(id.clone()))
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("agent {}", id)))
}

pub async fn get_framework(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<FrameworkSnapshot>> {
    let snapshot = state.coordinator.snapshot().await?;
    let framework_id = FrameworkId::new(id.clone());
    snapshot
        .framework(&framework_id)
        .or_else(|| {
            snapshot
                .completed_frameworks
                .iter()
                .find(|f| f.id == framework_id)
        })
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("framework {}", id)))
}
