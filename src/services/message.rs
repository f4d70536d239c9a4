use chrono::Utc;
use sqlx::Row;

use crate::database::DbPool;
use crate::models::message::{Message, MessageType, NewMessage};
use crate::services::conversation::{ensure_active_participant, fetch_active_conversation};
use crate::utils::error::{AppError, AppResult};

async fn fetch_message(pool: &DbPool, message_id: &str) -> AppResult<Message> {
    sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ? AND is_deleted = 0")
        .bind(message_id)
        .fetch_optional(pool.as_ref())
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".to_string()))
}

/// Persists a message and then refreshes the conversation's last-message
/// cache. The cache update is issued only after the insert is acknowledged,
/// so a reader never sees a last_message that is not yet readable.
pub async fn send(
    pool: &DbPool,
    conversation_id: &str,
    sender_id: &str,
    message_type: MessageType,
    content: String,
    file_url: Option<String>,
    file_name: Option<String>,
) -> AppResult<Message> {
    fetch_active_conversation(pool, conversation_id).await?;
    ensure_active_participant(pool, conversation_id, sender_id).await?;

    if message_type == MessageType::Text && content.trim().is_empty() {
        return Err(AppError::Validation(
            "Message content cannot be empty".to_string(),
        ));
    }

    let new_message = NewMessage::new(
        conversation_id.to_string(),
        sender_id.to_string(),
        message_type,
        content,
        file_url,
        file_name,
    );

    sqlx::query(
        "INSERT INTO messages
         (id, conversation_id, sender_id, message_type, content, file_url, file_name, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&new_message.id)
    .bind(&new_message.conversation_id)
    .bind(&new_message.sender_id)
    .bind(&new_message.message_type)
    .bind(&new_message.content)
    .bind(&new_message.file_url)
    .bind(&new_message.file_name)
    .bind(&new_message.created_at)
    .bind(&new_message.created_at)
    .execute(pool.as_ref())
    .await?;

    // Read back the durable row; this also picks up the store-assigned seq.
    let message = fetch_message(pool, &new_message.id).await?;

    sqlx::query(
        "UPDATE conversations
         SET last_message_content = ?, last_message_sender_id = ?, last_message_at = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&message.content)
    .bind(&message.sender_id)
    .bind(&message.created_at)
    .bind(&message.created_at)
    .bind(conversation_id)
    .execute(pool.as_ref())
    .await?;

    Ok(message)
}

/// One page of non-deleted messages, chronological within the page. The
/// window is selected newest-first so page 1 is always the most recent
/// slice, then reversed before returning.
pub async fn list(
    pool: &DbPool,
    conversation_id: &str,
    caller_id: &str,
    limit: i64,
    offset: i64,
) -> AppResult<(Vec<Message>, i64)> {
    fetch_active_conversation(pool, conversation_id).await?;
    ensure_active_participant(pool, conversation_id, caller_id).await?;

    let mut messages = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages
         WHERE conversation_id = ? AND is_deleted = 0
         ORDER BY created_at DESC, seq DESC LIMIT ? OFFSET ?",
    )
    .bind(conversation_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool.as_ref())
    .await?;

    messages.reverse();

    let total = sqlx::query(
        "SELECT COUNT(*) as count FROM messages WHERE conversation_id = ? AND is_deleted = 0",
    )
    .bind(conversation_id)
    .fetch_one(pool.as_ref())
    .await?
    .get::<i64, _>("count");

    Ok((messages, total))
}

/// Sender-only content edit; created_at and ordering are untouched.
pub async fn edit(
    pool: &DbPool,
    message_id: &str,
    caller_id: &str,
    content: String,
) -> AppResult<Message> {
    let message = fetch_message(pool, message_id).await?;

    if message.sender_id != caller_id {
        return Err(AppError::Forbidden(
            "Only the sender can edit a message".to_string(),
        ));
    }
    if content.trim().is_empty() {
        return Err(AppError::Validation(
            "Message content cannot be empty".to_string(),
        ));
    }

    sqlx::query("UPDATE messages SET content = ?, is_edited = 1, updated_at = ? WHERE id = ?")
        .bind(&content)
        .bind(Utc::now().to_rfc3339())
        .bind(message_id)
        .execute(pool.as_ref())
        .await?;

    fetch_message(pool, message_id).await
}

/// Sender-only soft delete; the row stays for audit but leaves all read
/// paths.
pub async fn delete(pool: &DbPool, message_id: &str, caller_id: &str) -> AppResult<Message> {
    let message = fetch_message(pool, message_id).await?;

    if message.sender_id != caller_id {
        return Err(AppError::Forbidden(
            "Only the sender can delete a message".to_string(),
        ));
    }

    sqlx::query("UPDATE messages SET is_deleted = 1, updated_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(message_id)
        .execute(pool.as_ref())
        .await?;

    Ok(message)
}

/// Records that a user has seen a message: adds the fine-grained readBy
/// entry and advances the coarse per-conversation marker.
pub async fn mark_message_read(
    pool: &DbPool,
    message_id: &str,
    conversation_id: &str,
    user_id: &str,
) -> AppResult<()> {
    let message = fetch_message(pool, message_id).await?;

    // Membership is checked against the conversation the message actually
    // lives in, never the caller-supplied id.
    ensure_active_participant(pool, &message.conversation_id, user_id).await?;

    if message.conversation_id != conversation_id {
        return Err(AppError::Validation(
            "Message does not belong to this conversation".to_string(),
        ));
    }

    let now = Utc::now().to_rfc3339();
    sqlx::query("INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?, ?, ?)")
        .bind(message_id)
        .bind(user_id)
        .bind(&now)
        .execute(pool.as_ref())
        .await?;

    sqlx::query(
        "UPDATE conversation_participants SET last_read_at = ?
         WHERE conversation_id = ? AND user_id = ?
           AND (last_read_at IS NULL OR last_read_at < ?)",
    )
    .bind(&now)
    .bind(conversation_id)
    .bind(user_id)
    .bind(&now)
    .execute(pool.as_ref())
    .await?;

    Ok(())
}
