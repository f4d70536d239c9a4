use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, post, put},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::AppState;
use crate::models::message::MessageType;
use crate::services::message;
use crate::utils::error::{AppError, AppResult};
use crate::utils::helpers::{extract_identity, to_json};
use crate::utils::jwt::Identity;
use crate::websocket::events::ServerEvent;
use crate::websocket::registry::conversation_room;

fn identity_from(headers: &HeaderMap) -> AppResult<Identity> {
    extract_identity(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing identity".to_string()))
}

#[derive(Deserialize)]
struct SendMessageRequest {
    #[serde(rename = "conversationId")]
    conversation_id: String,
    content: String,
    #[serde(rename = "messageType")]
    message_type: Option<String>,
    #[serde(rename = "fileUrl")]
    file_url: Option<String>,
    #[serde(rename = "fileName")]
    file_name: Option<String>,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let identity = identity_from(&headers)?;

    let message_type = match req.message_type.as_deref() {
        None => MessageType::Text,
        Some(raw) => MessageType::parse(raw)
            .ok_or_else(|| AppError::Validation(format!("Unknown message type: {}", raw)))?,
    };

    let message = message::send(
        &state.db,
        &req.conversation_id,
        &identity.user_id,
        message_type,
        req.content,
        req.file_url,
        req.file_name,
    )
    .await?;

    // Websocket subscribers see REST-originated sends too.
    state
        .registry
        .broadcast_room(
            &conversation_room(&req.conversation_id),
            &ServerEvent::NewMessage {
                message: message.clone(),
            },
            None,
        )
        .await;

    Ok((StatusCode::CREATED, Json(to_json(&message))))
}

#[derive(Deserialize)]
struct EditMessageRequest {
    content: String,
}

async fn edit_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
    Json(req): Json<EditMessageRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let identity = identity_from(&headers)?;
    let message = message::edit(&state.db, &message_id, &identity.user_id, req.content).await?;
    Ok(Json(to_json(&message)))
}

async fn delete_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let identity = identity_from(&headers)?;
    let message = message::delete(&state.db, &message_id, &identity.user_id).await?;
    Ok(Json(to_json(&message)))
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(send_message))
        .route("/:message_id", put(edit_message))
        .route("/:message_id", delete(delete_message))
        .with_state(state)
}
