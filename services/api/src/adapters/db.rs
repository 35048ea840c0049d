//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `ChatSessionStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Each session row embeds its ordered message list as a JSONB array.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medixa_core::domain::{ChatSession, Message};
use medixa_core::ports::{ChatSessionStore, PortError, PortResult};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ChatSessionStore` port.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Creates a new `PgSessionStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const SESSION_COLUMNS: &str =
    "id, owner_id, display_name, messages, last_activity_at, created_at, updated_at";

#[derive(FromRow)]
struct ChatSessionRecord {
    id: Uuid,
    owner_id: Uuid,
    display_name: String,
    messages: Json<Vec<Message>>,
    last_activity_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ChatSessionRecord {
    fn to_domain(self) -> ChatSession {
        ChatSession {
            id: self.id,
            owner_id: self.owner_id,
            display_name: self.display_name,
            messages: self.messages.0,
            last_activity_at: self.last_activity_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn not_found(session_id: Uuid) -> PortError {
    PortError::NotFound(format!("Session {} not found", session_id))
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// `ChatSessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatSessionStore for PgSessionStore {
    async fn create_session(&self, owner_id: Uuid, name: &str) -> PortResult<ChatSession> {
        let query = format!(
            "INSERT INTO chat_sessions (id, owner_id, display_name) VALUES ($1, $2, $3) RETURNING {}",
            SESSION_COLUMNS
        );
        let record = sqlx::query_as::<_, ChatSessionRecord>(&query)
            .bind(Uuid::new_v4())
            .bind(owner_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Option<ChatSession>> {
        let query = format!("SELECT {} FROM chat_sessions WHERE id = $1", SESSION_COLUMNS);
        let record = sqlx::query_as::<_, ChatSessionRecord>(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.map(ChatSessionRecord::to_domain))
    }

    async fn list_sessions(&self, owner_id: Uuid) -> PortResult<Vec<ChatSession>> {
        let query = format!(
            "SELECT {} FROM chat_sessions WHERE owner_id = $1 ORDER BY last_activity_at DESC",
            SESSION_COLUMNS
        );
        let records = sqlx::query_as::<_, ChatSessionRecord>(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        let sessions = records.into_iter().map(|r| r.to_domain()).collect();
        Ok(sessions)
    }

    async fn append_message(&self, session_id: Uuid, message: &Message) -> PortResult<()> {
        // Read-modify-write of the whole array, without a version check.
        let current: Option<(Json<Vec<Message>>,)> =
            sqlx::query_as("SELECT messages FROM chat_sessions WHERE id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        let (Json(mut messages),) = current.ok_or_else(|| not_found(session_id))?;
        messages.push(message.clone());

        let result = sqlx::query(
            "UPDATE chat_sessions SET messages = $1, last_activity_at = now(), updated_at = now() WHERE id = $2",
        )
        .bind(Json(messages))
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(not_found(session_id));
        }
        Ok(())
    }

    async fn rename_session(&self, session_id: Uuid, name: &str) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET display_name = $1, updated_at = now(), last_activity_at = now() WHERE id = $2",
        )
        .bind(name)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(not_found(session_id));
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid) -> PortResult<()> {
        // Messages live in the row, so removing it removes them with it.
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(not_found(session_id));
        }
        Ok(())
    }
}
