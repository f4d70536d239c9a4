use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::api::AppState;
use crate::models::conversation::ConversationKind;
use crate::services::conversation::{create_or_get, list_for_user, mark_read};
use crate::services::message;
use crate::utils::error::{AppError, AppResult};
use crate::utils::helpers::{extract_identity, pagination, to_json};
use crate::utils::jwt::Identity;

fn identity_from(headers: &HeaderMap) -> AppResult<Identity> {
    extract_identity(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing identity".to_string()))
}

#[derive(Deserialize)]
struct ListConversationsQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListConversationsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let identity = identity_from(&headers)?;

    let kind_filter = match query.kind.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            ConversationKind::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("Invalid conversation type: {}", raw)))?,
        ),
    };

    let (limit, offset) = pagination(query.page, query.limit);
    let (items, total) =
        list_for_user(&state.db, &identity.user_id, kind_filter, limit, offset).await?;

    Ok(Json(json!({
        "items": items,
        "total": total,
        "page": query.page.unwrap_or(1).max(1),
        "limit": limit,
    })))
}

#[derive(Deserialize)]
struct CreateConversationRequest {
    #[serde(rename = "type")]
    kind: String,
    name: Option<String>,
    #[serde(rename = "participantUserIds")]
    participant_user_ids: Vec<String>,
    #[serde(rename = "participantOrgIds")]
    participant_org_ids: Vec<String>,
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateConversationRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let identity = identity_from(&headers)?;

    let kind = ConversationKind::parse(&req.kind).ok_or_else(|| {
        AppError::Validation("Invalid conversation type. Must be \"direct\" or \"group\"".to_string())
    })?;

    let (view, created) = create_or_get(
        &state.db,
        &identity,
        &req.participant_user_ids,
        &req.participant_org_ids,
        kind,
        req.name,
    )
    .await?;

    // Direct dedup is a success path: the existing conversation comes back
    // with 200 instead of 201.
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(to_json(&view))))
}

#[derive(Deserialize)]
struct GetMessagesQuery {
    page: Option<i64>,
    limit: Option<i64>,
}

async fn get_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
    Query(query): Query<GetMessagesQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let identity = identity_from(&headers)?;

    let (limit, offset) = pagination(query.page, query.limit);
    let (items, total) = message::list(
        &state.db,
        &conversation_id,
        &identity.user_id,
        limit,
        offset,
    )
    .await?;

    Ok(Json(json!({
        "items": items,
        "total": total,
        "page": query.page.unwrap_or(1).max(1),
        "limit": limit,
    })))
}

async fn mark_conversation_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let identity = identity_from(&headers)?;
    let last_read_at = mark_read(&state.db, &conversation_id, &identity.user_id).await?;

    Ok(Json(json!({ "lastReadAt": last_read_at })))
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(list_conversations))
        .route("/", post(create_conversation))
        .route("/:conversation_id/messages", get(get_messages))
        .route("/:conversation_id/read", put(mark_conversation_read))
        .with_state(state)
}
