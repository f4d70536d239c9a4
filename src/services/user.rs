use sqlx::Row;

use crate::database::DbPool;
use crate::models::user::User;
use crate::utils::error::{AppError, AppResult};

pub async fn exists(pool: &DbPool, user_id: &str) -> AppResult<bool> {
    let count = sqlx::query("SELECT COUNT(*) as count FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool.as_ref())
        .await?
        .get::<i64, _>("count");
    Ok(count > 0)
}

pub async fn is_active(pool: &DbPool, user_id: &str) -> AppResult<bool> {
    let count = sqlx::query("SELECT COUNT(*) as count FROM users WHERE id = ? AND is_active = 1")
        .bind(user_id)
        .fetch_one(pool.as_ref())
        .await?
        .get::<i64, _>("count");
    Ok(count > 0)
}

/// Looks up a user that must exist and be active, as required of every
/// conversation participant.
pub async fn fetch_active(pool: &DbPool, user_id: &str) -> AppResult<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ? AND is_active = 1")
        .bind(user_id)
        .fetch_optional(pool.as_ref())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
}
