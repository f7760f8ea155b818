/// Activity Log
///
/// Append-only audit trail of sign-ins, access decisions, moderation and
/// post interactions. Entries are never updated or deleted.
use crate::{
    db::models::{parse_timestamp, timestamp},
    error::{GateError, GateResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, Sqlite, SqlitePool};

/// Default page size for activity listings
pub const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

/// Activity action tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    RequestAccess,
    Login,
    ApprovedUser,
    DeniedUser,
    BannedUser,
    UnbannedUser,
    LikedPost,
    CreatedPost,
    UpdatedPost,
    DeletedPost,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::RequestAccess => "request_access",
            ActivityAction::Login => "login",
            ActivityAction::ApprovedUser => "approved_user",
            ActivityAction::DeniedUser => "denied_user",
            ActivityAction::BannedUser => "banned_user",
            ActivityAction::UnbannedUser => "unbanned_user",
            ActivityAction::LikedPost => "liked_post",
            ActivityAction::CreatedPost => "created_post",
            ActivityAction::UpdatedPost => "updated_post",
            ActivityAction::DeletedPost => "deleted_post",
        }
    }

    pub fn from_str(s: &str) -> GateResult<Self> {
        match s {
            "request_access" => Ok(ActivityAction::RequestAccess),
            "login" => Ok(ActivityAction::Login),
            "approved_user" => Ok(ActivityAction::ApprovedUser),
            "denied_user" => Ok(ActivityAction::DeniedUser),
            "banned_user" => Ok(ActivityAction::BannedUser),
            "unbanned_user" => Ok(ActivityAction::UnbannedUser),
            "liked_post" => Ok(ActivityAction::LikedPost),
            "created_post" => Ok(ActivityAction::CreatedPost),
            "updated_post" => Ok(ActivityAction::UpdatedPost),
            "deleted_post" => Ok(ActivityAction::DeletedPost),
            _ => Err(GateError::Validation(format!("Invalid activity action: {}", s))),
        }
    }
}

/// Activity log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: i64,
    pub actor_id: Option<String>,
    pub action: ActivityAction,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEntry {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> GateResult<Self> {
        let action: String = row.try_get("action")?;
        let details: String = row.try_get("details")?;
        let ts: String = row.try_get("timestamp")?;

        Ok(Self {
            id: row.try_get("id")?,
            actor_id: row.try_get("actor_id")?,
            action: ActivityAction::from_str(&action)?,
            details: serde_json::from_str(&details)
                .map_err(|e| GateError::Internal(format!("Invalid activity details: {}", e)))?,
            timestamp: parse_timestamp(&ts)?,
        })
    }
}

/// Append one entry using any executor, so callers can log inside their
/// own transaction.
pub async fn append<'e, E>(
    executor: E,
    actor_id: Option<&str>,
    action: ActivityAction,
    details: &Value,
) -> GateResult<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO activity_log (actor_id, action, details, timestamp)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(actor_id)
    .bind(action.as_str())
    .bind(details.to_string())
    .bind(timestamp(Utc::now()))
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Activity log manager
#[derive(Clone)]
pub struct ActivityLog {
    db: SqlitePool,
}

impl ActivityLog {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record a standalone activity entry outside any transaction
    #[cfg(test)]
    pub async fn record(
        &self,
        actor_id: Option<&str>,
        action: ActivityAction,
        details: Value,
    ) -> GateResult<i64> {
        append(&self.db, actor_id, action, &details).await
    }

    /// List entries newest first, optionally filtered by action.
    ///
    /// Returns the page together with the total number of matching entries.
    pub async fn list(
        &self,
        limit: Option<i64>,
        action: Option<ActivityAction>,
    ) -> GateResult<(Vec<ActivityEntry>, i64)> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let action = action.map(|a| a.as_str());

        let rows = sqlx::query(
            r#"
            SELECT id, actor_id, action, details, timestamp
            FROM activity_log
            WHERE (?1 IS NULL OR action = ?1)
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(action)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM activity_log WHERE (?1 IS NULL OR action = ?1)",
        )
        .bind(action)
        .fetch_one(&self.db)
        .await?;

        let entries = rows
            .iter()
            .map(ActivityEntry::from_row)
            .collect::<GateResult<Vec<_>>>()?;

        Ok((entries, total))
    }
}
