use axum::{
    extract::{
        Query, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::AppState;
use crate::services::user;
use crate::utils::jwt::Identity;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Resolves a handshake credential into a verified identity. A token can
/// outlive the account, so the account must still be active too.
async fn authenticate(state: &AppState, token: Option<String>) -> Result<Identity, StatusCode> {
    let token = token.ok_or(StatusCode::UNAUTHORIZED)?;
    let identity = state
        .jwt_service
        .verify(&token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    match user::is_active(&state.db, &identity.user_id).await {
        Ok(true) => Ok(identity),
        Ok(false) => Err(StatusCode::UNAUTHORIZED),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Handshake: the credential is verified exactly once, before the upgrade.
/// An invalid or missing token rejects the connection outright; it never
/// becomes active.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let token = query.token.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.to_string())
    });

    let identity = authenticate(&state, token).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, identity, state)))
}

async fn handle_socket(socket: WebSocket, identity: Identity, state: Arc<AppState>) {
    super::connection::handle_connection(socket, identity, state).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::jwt::JwtService;
    use crate::websocket::registry::Registry;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_state() -> Arc<AppState> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();

        Arc::new(AppState {
            db: Arc::new(pool),
            jwt_service: Arc::new(JwtService::new("test-secret")),
            registry: Arc::new(Registry::new()),
        })
    }

    fn token_for(state: &AppState, user_id: &str) -> String {
        let identity = Identity {
            user_id: user_id.to_string(),
            role: "member".to_string(),
            organization_id: "org-1".to_string(),
        };
        state
            .jwt_service
            .generate_token(&identity, chrono::Duration::hours(1))
            .unwrap()
    }

    #[tokio::test]
    async fn test_authenticate_requires_active_account() {
        let state = test_state().await;
        sqlx::query(
            "INSERT INTO users (id, organization_id, first_name, last_name, created_at)
             VALUES ('alice', 'org-1', '', '', ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(state.db.as_ref())
        .await
        .unwrap();

        let token = token_for(&state, "alice");
        let identity = authenticate(&state, Some(token.clone())).await.unwrap();
        assert_eq!(identity.user_id, "alice");

        // Deactivation revokes the handshake even while the token is valid.
        sqlx::query("UPDATE users SET is_active = 0 WHERE id = 'alice'")
            .execute(state.db.as_ref())
            .await
            .unwrap();
        assert_eq!(
            authenticate(&state, Some(token)).await.unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_authenticate_rejects_missing_or_bad_token() {
        let state = test_state().await;

        assert_eq!(
            authenticate(&state, None).await.unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            authenticate(&state, Some("garbage".to_string())).await.unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
    }
}
