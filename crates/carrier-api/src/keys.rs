use axum::{
    Extension, Json,
    extract::{Path, State},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info};

use carrier_types::api::KeysResponse;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::AuthUser;

/// Hand out a user's key bundle, consuming one one-time prekey if any remain.
pub async fn get_keys(
    State(state): State<AppState>,
    requester: Option<Extension<AuthUser>>,
    Path(user_id): Path<String>,
) -> Result<Json<KeysResponse>, ApiError> {
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("user id required".to_string()));
    }

    let db = state.db.clone();
    let lookup = user_id.clone();
    let bundle = tokio::task::spawn_blocking(move || db.fetch_keys(&lookup))
        .await??
        .ok_or(ApiError::NotFound)?;

    match &bundle.one_time_prekey {
        Some(_) => match requester {
            Some(Extension(AuthUser(by))) => debug!("Issued one-time prekey for {} to {}", user_id, by),
            None => debug!("Issued one-time prekey for {}", user_id),
        },
        None => info!("{} has no one-time prekeys left; serving signed prekey only", user_id),
    }

    Ok(Json(KeysResponse {
        identity_pub: STANDARD.encode(&bundle.identity_pub),
        signed_prekey: STANDARD.encode(&bundle.signed_prekey),
        one_time_prekey: bundle.one_time_prekey.map(|k| STANDARD.encode(k)),
    }))
}
