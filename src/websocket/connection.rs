use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::api::AppState;
use crate::models::message::MessageType;
use crate::services::message;
use crate::utils::error::{AppError, AppResult};
use crate::utils::jwt::Identity;

use super::events::{ClientEvent, ServerEvent};
use super::registry::{ConnectionHandle, OUTBOUND_BUFFER, conversation_room, user_room};

/// Drives one authenticated connection from registration to close. The
/// caller has already verified the credential; a connection that reaches
/// this point is Active.
pub async fn handle_connection(socket: WebSocket, identity: Identity, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (handle, mut rx) = ConnectionHandle::new(&identity.user_id, OUTBOUND_BUFFER);

    state.registry.register(handle.clone()).await;
    // Private per-user channel for targeted notifications, independent of
    // any conversation room.
    state.registry.join(&handle, &user_room(&identity.user_id)).await;
    state
        .registry
        .broadcast_all(
            &ServerEvent::UserOnline {
                user_id: identity.user_id.clone(),
            },
            Some(&handle.id),
        )
        .await;
    handle.push(ServerEvent::Connected {
        user_id: identity.user_id.clone(),
    });

    tracing::info!(user_id = %identity.user_id, connection_id = %handle.id, "user connected");

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event)
                && sink.send(WsMessage::Text(json)).await.is_err()
            {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let WsMessage::Text(text) = frame else {
            continue;
        };

        // One bad event must not terminate the session: every failure is
        // scoped to an error event back to this connection only.
        match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => {
                if let Err(err) = handle_event(&state, &handle, &identity, event).await {
                    handle.push(ServerEvent::Error {
                        message: err.to_string(),
                    });
                }
            }
            Err(_) => {
                handle.push(ServerEvent::Error {
                    message: "Malformed event".to_string(),
                });
            }
        }
    }

    state.registry.leave_all(&handle).await;
    let was_current = state.registry.unregister(&handle).await;
    if was_current {
        state
            .registry
            .broadcast_all(
                &ServerEvent::UserOffline {
                    user_id: identity.user_id.clone(),
                },
                Some(&handle.id),
            )
            .await;
    }
    send_task.abort();

    tracing::info!(user_id = %identity.user_id, connection_id = %handle.id, "user disconnected");
}

async fn handle_event(
    state: &Arc<AppState>,
    handle: &Arc<ConnectionHandle>,
    identity: &Identity,
    event: ClientEvent,
) -> AppResult<()> {
    match event {
        // Joins are deliberately cheap and unauthorized; the security
        // boundary is the participant check inside the message service.
        ClientEvent::JoinRoom { conversation_id } => {
            state
                .registry
                .join(handle, &conversation_room(&conversation_id))
                .await;
            tracing::debug!(user_id = %identity.user_id, %conversation_id, "joined room");
        }
        ClientEvent::LeaveRoom { conversation_id } => {
            state
                .registry
                .leave(handle, &conversation_room(&conversation_id))
                .await;
        }
        ClientEvent::SendMessage {
            conversation_id,
            content,
            message_type,
            file_url,
            file_name,
        } => {
            let message_type = match message_type.as_deref() {
                None => MessageType::Text,
                Some(raw) => MessageType::parse(raw).ok_or_else(|| {
                    AppError::Validation(format!("Unknown message type: {}", raw))
                })?,
            };

            let message = message::send(
                &state.db,
                &conversation_id,
                &identity.user_id,
                message_type,
                content,
                file_url,
                file_name,
            )
            .await?;

            let message_id = message.id.clone();
            state
                .registry
                .broadcast_room(
                    &conversation_room(&conversation_id),
                    &ServerEvent::NewMessage { message },
                    None,
                )
                .await;
            handle.push(ServerEvent::MessageDelivered { message_id });
        }
        ClientEvent::TypingStart { conversation_id } => {
            broadcast_typing(state, handle, identity, &conversation_id, true).await;
        }
        ClientEvent::TypingStop { conversation_id } => {
            broadcast_typing(state, handle, identity, &conversation_id, false).await;
        }
        ClientEvent::MessageRead {
            message_id,
            conversation_id,
        } => {
            message::mark_message_read(&state.db, &message_id, &conversation_id, &identity.user_id)
                .await?;

            state
                .registry
                .broadcast_room(
                    &conversation_room(&conversation_id),
                    &ServerEvent::MessageRead {
                        conversation_id: conversation_id.clone(),
                        message_id,
                        user_id: identity.user_id.clone(),
                    },
                    Some(&handle.id),
                )
                .await;
        }
    }

    Ok(())
}

/// Ephemeral, best-effort, never persisted or acknowledged.
async fn broadcast_typing(
    state: &Arc<AppState>,
    handle: &Arc<ConnectionHandle>,
    identity: &Identity,
    conversation_id: &str,
    is_typing: bool,
) {
    state
        .registry
        .broadcast_room(
            &conversation_room(conversation_id),
            &ServerEvent::UserTyping {
                conversation_id: conversation_id.to_string(),
                user_id: identity.user_id.clone(),
                is_typing,
            },
            Some(&handle.id),
        )
        .await;
}
