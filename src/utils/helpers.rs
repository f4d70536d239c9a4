use axum::http::HeaderMap;
use serde::Serialize;

use crate::utils::jwt::Identity;

pub fn to_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).expect("Failed to serialize to JSON")
}

pub fn extract_identity(headers: &HeaderMap) -> Option<Identity> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };

    Some(Identity {
        user_id: get(crate::middleware::auth::AUTH_USER_ID_HEADER)?,
        role: get(crate::middleware::auth::AUTH_ROLE_HEADER)?,
        organization_id: get(crate::middleware::auth::AUTH_ORG_ID_HEADER)?,
    })
}

/// Clamps page/limit to sane bounds and returns (limit, offset).
pub fn pagination(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(50).clamp(1, 100);
    (limit, (page - 1) * limit)
}
