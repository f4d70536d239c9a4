pub mod conversations;
pub mod messages;

use axum::{Router, routing::get};
use std::sync::Arc;

use crate::database::DbPool;
use crate::utils::jwt::JwtService;
use crate::websocket::registry::Registry;

pub struct AppState {
    pub db: DbPool,
    pub jwt_service: Arc<JwtService>,
    pub registry: Arc<Registry>,
}

async fn health_check() -> &'static str {
    "OK"
}

pub fn routes(state: Arc<AppState>) -> Router {
    let ws_route = Router::new()
        .route(
            "/ws",
            axum::routing::get(crate::websocket::handlers::ws_handler),
        )
        .with_state(state.clone());

    let protected_routes = Router::new()
        .nest("/conversations", conversations::routes(state.clone()))
        .nest("/messages", messages::routes(state.clone()))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ));

    Router::new()
        .merge(ws_route)
        .route("/health", get(health_check))
        .merge(protected_routes)
}
