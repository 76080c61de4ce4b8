use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AppState};
use crate::{gateway, keys, status};

pub fn router(state: AppState) -> Router {
    let key_routes = Router::new()
        .route("/v1/keys/{user}", get(keys::get_keys))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::key_fetch_auth,
        ));

    Router::new()
        .route("/v1/register", post(auth::register))
        .merge(key_routes)
        .route("/ws", get(gateway::ws_upgrade))
        .route("/health", get(status::health))
        .route("/stats", get(status::stats))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
