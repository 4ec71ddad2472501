use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub async fn register(pool: &PgPool, name: &str) -> Result<Self, sqlx::Error> {
        let api_key = format!("key-{}", Uuid::new_v4());
        sqlx::query_as::<_, Self>(
            "INSERT INTO users (name, api_key, role) VALUES ($1, $2, 'USER') RETURNING *",
        )
        .bind(name)
        .bind(api_key)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_api_key(pool: &PgPool, api_key: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM users WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// Ensure a single ADMIN user exists with the given token, idempotent
    /// across restarts. There is no HTTP endpoint that grants ADMIN; the
    /// role is seeded this way at boot from environment configuration.
    pub async fn bootstrap_admin(pool: &PgPool, api_key: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO users (name, api_key, role) VALUES ('admin', $1, 'ADMIN')
             ON CONFLICT (api_key) DO NOTHING",
        )
        .bind(api_key)
        .execute(pool)
        .await?;
        Ok(())
    }
}
