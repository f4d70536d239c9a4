use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::api::AppState;
use crate::utils::error::AppError;

pub const AUTH_USER_ID_HEADER: &str = "x-user-id";
pub const AUTH_ROLE_HEADER: &str = "x-user-role";
pub const AUTH_ORG_ID_HEADER: &str = "x-organization-id";

/// Verifies the bearer credential and stamps the identity triple onto the
/// request for downstream handlers.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let token = auth_header
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::Unauthorized("Missing or invalid authorization header".to_string())
        })?;

    let identity = state.jwt_service.verify(token)?;

    // The account may have been deactivated since the token was issued.
    if !crate::services::user::is_active(&state.db, &identity.user_id)
        .await
        .map_err(|_| AppError::Internal("Database error during auth check".to_string()))?
    {
        return Err(AppError::Unauthorized("User no longer active".to_string()));
    }

    let set = |request: &mut Request, name: &'static str, value: &str| {
        value
            .parse()
            .map(|v| request.headers_mut().insert(name, v))
            .map_err(|_| AppError::Internal("Failed to set identity header".to_string()))
    };
    set(&mut request, AUTH_USER_ID_HEADER, &identity.user_id)?;
    set(&mut request, AUTH_ROLE_HEADER, &identity.role)?;
    set(&mut request, AUTH_ORG_ID_HEADER, &identity.organization_id)?;

    Ok(next.run(request).await)
}
