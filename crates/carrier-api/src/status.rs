use axum::{Json, extract::State};

use carrier_types::api::{HealthResponse, StatsResponse};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        clients: state.hub.online_count().await,
    })
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.hub.stats().await?;

    Ok(Json(StatsResponse {
        online_clients: stats.online_clients,
        queued_messages: stats.transient_messages + stats.durable_messages,
        transient_messages: stats.transient_messages,
        durable_messages: stats.durable_messages,
        pending_payments: stats.pending_payments,
        timestamp: chrono::Utc::now().timestamp(),
    }))
}
