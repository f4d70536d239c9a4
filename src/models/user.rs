use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Read-only projection of the external account system. This core never
/// creates or mutates users; it only validates participants against them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub organization_id: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub is_active: i64,
    pub created_at: String,
}
