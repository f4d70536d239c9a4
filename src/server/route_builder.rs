use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::AppState;
use crate::database;
use crate::utils::jwt::JwtService;
use crate::websocket::registry::Registry;

pub async fn register_routes() -> Router {
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://ecochat.db?mode=rwc".to_string());

    let db = database::create_pool(&database_url)
        .await
        .expect("Failed to create database pool");

    tracing::info!("Database connected and migrations applied");

    let jwt_service = Arc::new(JwtService::from_env().expect("Failed to initialize JWT service"));
    // Process-local by design: presence is rebuilt from zero on restart.
    let registry = Arc::new(Registry::new());

    let state = Arc::new(AppState {
        db,
        jwt_service,
        registry,
    });

    let api_routes = crate::api::routes(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
