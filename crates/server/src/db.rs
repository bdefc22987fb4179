//! Relational persistence: player identity and best scores.
//!
//! The pool is lazy; nothing connects until the first query, and query
//! failures never take the game down. They are logged by the callers and
//! play continues without persistence.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// One row of the `players` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlayerRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub best_score: i32,
}

/// Query surface over the shared connection pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Queries {
    pool: PgPool,
}

impl Queries {
    /// Open a lazy pool against the given DSN.
    pub fn connect_lazy(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    /// Create the `players` table when absent.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS players (
                id BIGSERIAL PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                best_score INT NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn player_by_username(&self, username: &str) -> Result<Option<PlayerRow>, sqlx::Error> {
        sqlx::query_as::<_, PlayerRow>(
            "SELECT id, username, password_hash, best_score
             FROM players
             WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn create_player(&self, username: &str, password_hash: &str) -> Result<PlayerRow, sqlx::Error> {
        sqlx::query_as::<_, PlayerRow>(
            "INSERT INTO players (username, password_hash)
             VALUES ($1, $2)
             RETURNING id, username, password_hash, best_score",
        )
        .bind(username)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn update_player_best_score(&self, id: i64, best_score: i32) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE players SET best_score = $1 WHERE id = $2")
            .bind(best_score)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
