use chrono::Utc;
use itertools::Itertools;
use sqlx::Row;

use crate::database::DbPool;
use crate::models::conversation::{Conversation, ConversationKind, ConversationView, Participant};
use crate::services::user;
use crate::utils::error::{AppError, AppResult};
use crate::utils::jwt::Identity;

/// Fetches a conversation that exists and has not been soft-deleted.
pub async fn fetch_active_conversation(
    pool: &DbPool,
    conversation_id: &str,
) -> AppResult<Conversation> {
    sqlx::query_as::<_, Conversation>(
        "SELECT * FROM conversations WHERE id = ? AND is_active = 1",
    )
    .bind(conversation_id)
    .fetch_optional(pool.as_ref())
    .await?
    .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))
}

/// The membership check behind every read and write on a conversation.
pub async fn ensure_active_participant(
    pool: &DbPool,
    conversation_id: &str,
    user_id: &str,
) -> AppResult<()> {
    let count = sqlx::query(
        "SELECT COUNT(*) as count FROM conversation_participants
         WHERE conversation_id = ? AND user_id = ? AND is_active = 1",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_one(pool.as_ref())
    .await?
    .get::<i64, _>("count");

    if count == 0 {
        return Err(AppError::Forbidden(
            "You are not a participant of this conversation".to_string(),
        ));
    }
    Ok(())
}

async fn load_view(pool: &DbPool, conversation: Conversation) -> AppResult<ConversationView> {
    let participants = sqlx::query_as::<_, Participant>(
        "SELECT * FROM conversation_participants WHERE conversation_id = ? ORDER BY joined_at, rowid",
    )
    .bind(&conversation.id)
    .fetch_all(pool.as_ref())
    .await?;

    // Derived from the current active participants, not stored.
    let organization_ids: Vec<String> = participants
        .iter()
        .filter(|p| p.is_active == 1)
        .map(|p| p.organization_id.clone())
        .unique()
        .collect();

    Ok(ConversationView {
        conversation,
        participants,
        organization_ids,
    })
}

async fn find_direct_between(
    pool: &DbPool,
    user_a: &str,
    user_b: &str,
) -> AppResult<Option<Conversation>> {
    let existing = sqlx::query_as::<_, Conversation>(
        "SELECT c.* FROM conversations c
         JOIN conversation_participants p1
           ON p1.conversation_id = c.id AND p1.user_id = ? AND p1.is_active = 1
         JOIN conversation_participants p2
           ON p2.conversation_id = c.id AND p2.user_id = ? AND p2.is_active = 1
         WHERE c.kind = 'direct' AND c.is_active = 1
         LIMIT 1",
    )
    .bind(user_a)
    .bind(user_b)
    .fetch_optional(pool.as_ref())
    .await?;

    Ok(existing)
}

/// Creates a conversation, or returns the existing one when a Direct chat
/// between the same pair is already active (idempotent-create semantics).
/// The boolean is true when a new conversation was persisted.
pub async fn create_or_get(
    pool: &DbPool,
    initiator: &Identity,
    participant_user_ids: &[String],
    participant_org_ids: &[String],
    kind: ConversationKind,
    name: Option<String>,
) -> AppResult<(ConversationView, bool)> {
    if participant_user_ids.is_empty() {
        return Err(AppError::Validation(
            "At least one participant is required".to_string(),
        ));
    }
    if participant_user_ids.len() != participant_org_ids.len() {
        return Err(AppError::Validation(
            "Number of participant organizations must match number of participant users"
                .to_string(),
        ));
    }

    let others: Vec<(&String, &String)> = participant_user_ids
        .iter()
        .zip(participant_org_ids.iter())
        .filter(|(uid, _)| **uid != initiator.user_id)
        .unique_by(|(uid, _)| uid.as_str())
        .collect();

    if kind == ConversationKind::Direct && others.len() != 1 {
        return Err(AppError::Validation(
            "A direct conversation requires exactly one other participant".to_string(),
        ));
    }
    if others.is_empty() {
        return Err(AppError::Validation(
            "Cannot create a conversation with yourself only".to_string(),
        ));
    }

    // Every referenced user must exist and be active before anything is
    // written.
    for (user_id, _) in &others {
        user::fetch_active(pool, user_id).await?;
    }

    if kind == ConversationKind::Direct {
        let (other_id, _) = others[0];
        if let Some(existing) = find_direct_between(pool, &initiator.user_id, other_id).await? {
            let view = load_view(pool, existing).await?;
            return Ok((view, false));
        }
    }

    let conversation = Conversation::new(kind, name, initiator.user_id.clone());

    let joined_at = Utc::now().to_rfc3339();
    let mut members: Vec<(&str, &str)> =
        vec![(initiator.user_id.as_str(), initiator.organization_id.as_str())];
    for (uid, oid) in &others {
        members.push((uid.as_str(), oid.as_str()));
    }

    persist_conversation(pool, &conversation, &members, &joined_at).await?;

    tracing::info!(
        conversation_id = %conversation.id,
        kind = %conversation.kind,
        "conversation created"
    );

    let view = load_view(pool, conversation).await?;
    Ok((view, true))
}

/// Conversation and participant rows land in one transaction: a failed
/// participant insert rolls the whole creation back instead of leaving an
/// active conversation with a partial participant set.
async fn persist_conversation(
    pool: &DbPool,
    conversation: &Conversation,
    members: &[(&str, &str)],
    joined_at: &str,
) -> AppResult<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO conversations (id, kind, display_name, created_by, is_active, created_at, updated_at)
         VALUES (?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(&conversation.id)
    .bind(&conversation.kind)
    .bind(&conversation.display_name)
    .bind(&conversation.created_by)
    .bind(&conversation.created_at)
    .bind(&conversation.updated_at)
    .execute(&mut *tx)
    .await?;

    for (user_id, organization_id) in members {
        sqlx::query(
            "INSERT INTO conversation_participants
             (conversation_id, user_id, organization_id, joined_at, is_active)
             VALUES (?, ?, ?, ?, 1)",
        )
        .bind(&conversation.id)
        .bind(user_id)
        .bind(organization_id)
        .bind(joined_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Conversations the user actively participates in, most recently active
/// first. Returns the page plus the unpaginated total.
pub async fn list_for_user(
    pool: &DbPool,
    user_id: &str,
    kind_filter: Option<ConversationKind>,
    limit: i64,
    offset: i64,
) -> AppResult<(Vec<ConversationView>, i64)> {
    let (conversations, total) = match kind_filter {
        Some(kind) => {
            let items = sqlx::query_as::<_, Conversation>(
                "SELECT c.* FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ? AND p.is_active = 1 AND c.is_active = 1 AND c.kind = ?
                 ORDER BY c.updated_at DESC LIMIT ? OFFSET ?",
            )
            .bind(user_id)
            .bind(kind.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(pool.as_ref())
            .await?;

            let total = sqlx::query(
                "SELECT COUNT(*) as count FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ? AND p.is_active = 1 AND c.is_active = 1 AND c.kind = ?",
            )
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_one(pool.as_ref())
            .await?
            .get::<i64, _>("count");

            (items, total)
        }
        None => {
            let items = sqlx::query_as::<_, Conversation>(
                "SELECT c.* FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ? AND p.is_active = 1 AND c.is_active = 1
                 ORDER BY c.updated_at DESC LIMIT ? OFFSET ?",
            )
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool.as_ref())
            .await?;

            let total = sqlx::query(
                "SELECT COUNT(*) as count FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ? AND p.is_active = 1 AND c.is_active = 1",
            )
            .bind(user_id)
            .fetch_one(pool.as_ref())
            .await?
            .get::<i64, _>("count");

            (items, total)
        }
    };

    let mut views = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        views.push(load_view(pool, conversation).await?);
    }

    Ok((views, total))
}

/// Advances the caller's read marker to now and returns the stored value.
/// The guarded update means the marker never moves backwards.
pub async fn mark_read(
    pool: &DbPool,
    conversation_id: &str,
    user_id: &str,
) -> AppResult<String> {
    fetch_active_conversation(pool, conversation_id).await?;
    ensure_active_participant(pool, conversation_id, user_id).await?;

    let now = Utc::now().to_rfc3339();
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

    let last_read_at = sqlx::query(
        "SELECT last_read_at FROM conversation_participants
         WHERE conversation_id = ? AND user_id = ?",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_one(pool.as_ref())
    .await?
    .get::<Option<String>, _>("last_read_at");

    last_read_at.ok_or_else(|| AppError::Internal("Read marker missing after update".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    async fn test_pool() -> DbPool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::database::run_migrations(&pool).await.unwrap();
        Arc::new(pool)
    }

    async fn seed_user(pool: &DbPool, id: &str, org: &str) {
        sqlx::query(
            "INSERT INTO users (id, organization_id, first_name, last_name, created_at)
             VALUES (?, ?, ?, '', ?)",
        )
        .bind(id)
        .bind(org)
        .bind(id)
        .bind(Utc::now().to_rfc3339())
        .execute(pool.as_ref())
        .await
        .unwrap();
    }

    fn identity(user_id: &str, org: &str) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            role: "member".to_string(),
            organization_id: org.to_string(),
        }
    }

    async fn create_direct(pool: &DbPool, a: &str, a_org: &str, b: &str, b_org: &str) -> (ConversationView, bool) {
        create_or_get(
            pool,
            &identity(a, a_org),
            &[b.to_string()],
            &[b_org.to_string()],
            ConversationKind::Direct,
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_direct_dedup_both_directions() {
        let pool = test_pool().await;
        seed_user(&pool, "alice", "org-1").await;
        seed_user(&pool, "bob", "org-2").await;

        let (first, created) = create_direct(&pool, "alice", "org-1", "bob", "org-2").await;
        assert!(created);

        let (again, created) = create_direct(&pool, "alice", "org-1", "bob", "org-2").await;
        assert!(!created);
        assert_eq!(again.conversation.id, first.conversation.id);

        // Same pair seen from the other side resolves to the same chat.
        let (reversed, created) = create_direct(&pool, "bob", "org-2", "alice", "org-1").await;
        assert!(!created);
        assert_eq!(reversed.conversation.id, first.conversation.id);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let pool = test_pool().await;
        seed_user(&pool, "alice", "org-1").await;

        let err = create_or_get(
            &pool,
            &identity("alice", "org-1"),
            &["bob".to_string()],
            &[],
            ConversationKind::Direct,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = create_or_get(
            &pool,
            &identity("alice", "org-1"),
            &["alice".to_string()],
            &["org-1".to_string()],
            ConversationKind::Direct,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_participant_not_found() {
        let pool = test_pool().await;
        seed_user(&pool, "alice", "org-1").await;

        let err = create_or_get(
            &pool,
            &identity("alice", "org-1"),
            &["ghost".to_string()],
            &["org-2".to_string()],
            ConversationKind::Direct,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_group_collects_organizations() {
        let pool = test_pool().await;
        seed_user(&pool, "alice", "org-1").await;
        seed_user(&pool, "bob", "org-2").await;
        seed_user(&pool, "carol", "org-2").await;

        let (view, created) = create_or_get(
            &pool,
            &identity("alice", "org-1"),
            &["bob".to_string(), "carol".to_string()],
            &["org-2".to_string(), "org-2".to_string()],
            ConversationKind::Group,
            Some("climate action".to_string()),
        )
        .await
        .unwrap();

        assert!(created);
        assert_eq!(view.conversation.display_name.as_deref(), Some("climate action"));
        assert_eq!(view.participants.len(), 3);
        assert_eq!(view.organization_ids, vec!["org-1", "org-2"]);
    }

    #[tokio::test]
    async fn test_list_excludes_non_participants() {
        let pool = test_pool().await;
        seed_user(&pool, "alice", "org-1").await;
        seed_user(&pool, "bob", "org-2").await;
        seed_user(&pool, "carol", "org-3").await;

        create_direct(&pool, "alice", "org-1", "bob", "org-2").await;

        let (for_alice, total) = list_for_user(&pool, "alice", None, 50, 0).await.unwrap();
        assert_eq!(for_alice.len(), 1);
        assert_eq!(total, 1);

        let (for_carol, total) = list_for_user(&pool, "carol", None, 50, 0).await.unwrap();
        assert!(for_carol.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_list_kind_filter() {
        let pool = test_pool().await;
        seed_user(&pool, "alice", "org-1").await;
        seed_user(&pool, "bob", "org-2").await;
        seed_user(&pool, "carol", "org-2").await;

        create_direct(&pool, "alice", "org-1", "bob", "org-2").await;
        create_or_get(
            &pool,
            &identity("alice", "org-1"),
            &["bob".to_string(), "carol".to_string()],
            &["org-2".to_string(), "org-2".to_string()],
            ConversationKind::Group,
            Some("team".to_string()),
        )
        .await
        .unwrap();

        let (groups, total) =
            list_for_user(&pool, "alice", Some(ConversationKind::Group), 50, 0)
                .await
                .unwrap();
        assert_eq!(total, 1);
        assert_eq!(groups[0].conversation.kind, "group");
    }

    #[tokio::test]
    async fn test_mark_read_requires_membership() {
        let pool = test_pool().await;
        seed_user(&pool, "alice", "org-1").await;
        seed_user(&pool, "bob", "org-2").await;
        seed_user(&pool, "carol", "org-3").await;

        let (view, _) = create_direct(&pool, "alice", "org-1", "bob", "org-2").await;

        let err = mark_read(&pool, &view.conversation.id, "carol").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = mark_read(&pool, "no-such-conversation", "alice").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_read_never_decreases() {
        let pool = test_pool().await;
        seed_user(&pool, "alice", "org-1").await;
        seed_user(&pool, "bob", "org-2").await;

        let (view, _) = create_direct(&pool, "alice", "org-1", "bob", "org-2").await;

        let future = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        sqlx::query(
            "UPDATE conversation_participants SET last_read_at = ?
             WHERE conversation_id = ? AND user_id = 'alice'",
        )
        .bind(&future)
        .bind(&view.conversation.id)
        .execute(pool.as_ref())
        .await
        .unwrap();

        let stored = mark_read(&pool, &view.conversation.id, "alice").await.unwrap();
        assert_eq!(stored, future);
    }

    #[tokio::test]
    async fn test_failed_participant_insert_rolls_back_conversation() {
        let pool = test_pool().await;

        let conversation = Conversation::new(
            ConversationKind::Group,
            Some("doomed".to_string()),
            "alice".to_string(),
        );
        let conversation_id = conversation.id.clone();
        let joined_at = Utc::now().to_rfc3339();

        // The duplicate member violates the participant primary key partway
        // through the loop.
        let err = persist_conversation(
            &pool,
            &conversation,
            &[("alice", "org-1"), ("alice", "org-1")],
            &joined_at,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        let count = sqlx::query("SELECT COUNT(*) as count FROM conversations WHERE id = ?")
            .bind(&conversation_id)
            .fetch_one(pool.as_ref())
            .await
            .unwrap()
            .get::<i64, _>("count");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_departed_participant_is_not_active() {
        let pool = test_pool().await;
        seed_user(&pool, "alice", "org-1").await;
        seed_user(&pool, "bob", "org-2").await;

        let (view, _) = create_direct(&pool, "alice", "org-1", "bob", "org-2").await;

        sqlx::query(
            "UPDATE conversation_participants SET is_active = 0
             WHERE conversation_id = ? AND user_id = 'bob'",
        )
        .bind(&view.conversation.id)
        .execute(pool.as_ref())
        .await
        .unwrap();

        let err = ensure_active_participant(&pool, &view.conversation.id, "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let (for_bob, _) = list_for_user(&pool, "bob", None, 50, 0).await.unwrap();
        assert!(for_bob.is_empty());
    }
}
