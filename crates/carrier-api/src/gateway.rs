use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;
use tracing::info;

use carrier_hub::connection;

use crate::auth::{AppState, authenticate};
use crate::error::ApiError;
use crate::middleware::bearer_token;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Authenticate before the upgrade; a bad token never gets a socket.
/// The `Authorization` header wins over the `token` query parameter.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)
        .or(query.token)
        .ok_or(ApiError::MissingToken)?;
    let user_id = authenticate(&state, &token).await?;

    info!("WebSocket upgrade for {}", user_id);

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, hub, user_id)))
}
