use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use crate::auth::{AppState, authenticate};
use crate::error::ApiError;

/// User id resolved from the bearer token, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

/// Token from an `Authorization: Bearer <token>` header. The scheme is
/// matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Guard for prekey fetches. Open unless `keys_require_auth` is set.
pub async fn key_fetch_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.keys_require_auth {
        return Ok(next.run(req).await);
    }

    let token = bearer_token(req.headers()).ok_or(ApiError::MissingToken)?;
    let user_id = authenticate(&state, &token).await?;
    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}
