use std::sync::Arc;

use axum::{Json, extract::State, extract::rejection::JsonRejection, response::IntoResponse};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use carrier_db::Database;
use carrier_db::models::NewUser;
use carrier_hub::Hub;
use carrier_types::api::{RegisterRequest, RegisterResponse};
use carrier_types::envelope::BASE64_LENIENT;

use crate::error::ApiError;

/// Random bytes behind each bearer token.
const TOKEN_BYTES: usize = 32;
const MAX_USER_ID_LEN: usize = 64;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub hub: Hub,
    /// Require a bearer token on prekey fetches.
    pub keys_require_auth: bool,
}

/// Register (or re-register) a user and publish its prekeys. Each call
/// issues a new token; the previous one stops authenticating.
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    validate_user_id(&req.id)?;
    let identity_pub = decode_key("identity_pub", &req.identity_pub)?;
    let signed_prekey = decode_key("signed_prekey", &req.signed_prekey)?;
    let one_time_prekeys = req
        .one_time_prekeys
        .iter()
        .map(|k| decode_key("one_time_prekeys", k))
        .collect::<Result<Vec<_>, _>>()?;

    let token = generate_token();
    let digest = token_digest(&token);
    let prekey_count = one_time_prekeys.len();

    let db = state.db.clone();
    let user_id = req.id.clone();
    tokio::task::spawn_blocking(move || {
        db.register_user(
            &NewUser {
                id: &user_id,
                phone: &req.phone,
                display_name: &req.display_name,
                identity_pub: &identity_pub,
                signed_prekey: &signed_prekey,
                token_digest: &digest,
            },
            &one_time_prekeys,
        )
    })
    .await??;

    info!("Registered {} with {} one-time prekeys", req.id, prekey_count);

    Ok(Json(RegisterResponse {
        status: "ok".to_string(),
        id: req.id,
        token,
    }))
}

/// Resolve a bearer token to its user id.
pub async fn authenticate(state: &AppStateInner, token: &str) -> Result<String, ApiError> {
    if token.is_empty() {
        return Err(ApiError::MissingToken);
    }

    let db = state.db.clone();
    let digest = token_digest(token);
    let user_id = tokio::task::spawn_blocking(move || db.user_id_for_token(&digest)).await??;

    user_id.ok_or_else(|| {
        warn!("Rejected unknown bearer token");
        ApiError::InvalidToken
    })
}

/// 32 bytes from the OS CSPRNG, URL-safe base64 without padding.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Tokens are stored as their SHA-256 hex digest only.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn validate_user_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() || id.len() > MAX_USER_ID_LEN {
        return Err(ApiError::BadRequest(format!(
            "id must be 1 to {} bytes",
            MAX_USER_ID_LEN
        )));
    }
    if id.chars().any(|c| c == '/' || c.is_whitespace() || c.is_control()) {
        return Err(ApiError::BadRequest("id contains invalid characters".to_string()));
    }
    Ok(())
}

fn decode_key(field: &str, encoded: &str) -> Result<Vec<u8>, ApiError> {
    let bytes = BASE64_LENIENT
        .decode(encoded.trim())
        .map_err(|e| ApiError::BadRequest(format!("{} is not valid base64: {}", field, e)))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(bytes)
}
