/// Entitlement store records and row decoding
use crate::error::{GateError, GateResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

/// Format a timestamp for storage.
///
/// Fixed precision with a `Z` suffix so stored values sort lexically in
/// time order.
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn parse_timestamp(value: &str) -> GateResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GateError::Internal(format!("Invalid timestamp: {}", e)))
}

fn optional_timestamp(row: &SqliteRow, column: &str) -> GateResult<Option<DateTime<Utc>>> {
    match row.try_get::<Option<String>, _>(column)? {
        Some(value) => parse_timestamp(&value).map(Some),
        None => Ok(None),
    }
}

/// A verified external identity as handed over by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub external_id: String,
    pub username: String,
    pub discriminator: String,
    pub email: String,
    pub avatar: Option<String>,
}

impl Identity {
    fn from_row(row: &SqliteRow) -> GateResult<Self> {
        Ok(Self {
            external_id: row.try_get("external_id")?,
            username: row.try_get("username")?,
            discriminator: row.try_get("discriminator")?,
            email: row.try_get("email")?,
            avatar: row.try_get("avatar")?,
        })
    }
}

/// Access request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Denied => "denied",
        }
    }

    pub fn from_str(s: &str) -> GateResult<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "denied" => Ok(RequestStatus::Denied),
            _ => Err(GateError::Validation(format!("Invalid request status: {}", s))),
        }
    }
}

/// A request by an identity to be let onto the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub id: String,
    #[serde(flatten)]
    pub identity: Identity,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub denied_at: Option<DateTime<Utc>>,
}

impl AccessRequest {
    pub const COLUMNS: &'static str = "id, external_id, username, discriminator, email, avatar, \
         status, created_at, approved_at, approved_by, denied_at";

    pub fn from_row(row: &SqliteRow) -> GateResult<Self> {
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            identity: Identity::from_row(row)?,
            status: RequestStatus::from_str(&status)?,
            created_at: parse_timestamp(&created_at)?,
            approved_at: optional_timestamp(row, "approved_at")?,
            approved_by: row.try_get("approved_by")?,
            denied_at: optional_timestamp(row, "denied_at")?,
        })
    }
}

/// User account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Banned,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Banned => "banned",
        }
    }

    pub fn from_str(s: &str) -> GateResult<Self> {
        match s.to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "banned" => Ok(UserStatus::Banned),
            _ => Err(GateError::Validation(format!("Invalid user status: {}", s))),
        }
    }
}

/// An approved identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(flatten)]
    pub identity: Identity,
    pub status: UserStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub const COLUMNS: &'static str = "id, external_id, username, discriminator, email, avatar, \
         status, approved_by, approved_at, last_login, created_at";

    pub fn from_row(row: &SqliteRow) -> GateResult<Self> {
        let status: String = row.try_get("status")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            identity: Identity::from_row(row)?,
            status: UserStatus::from_str(&status)?,
            approved_by: row.try_get("approved_by")?,
            approved_at: optional_timestamp(row, "approved_at")?,
            last_login: optional_timestamp(row, "last_login")?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

/// A feed post
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub content: String,
    pub image_url: Option<String>,
    pub is_locked: bool,
    pub likes: i64,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub const COLUMNS: &'static str =
        "id, content, image_url, is_locked, likes, creator_id, created_at, updated_at";

    pub fn from_row(row: &SqliteRow) -> GateResult<Self> {
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            content: row.try_get("content")?,
            image_url: row.try_get("image_url")?,
            is_locked: row.try_get("is_locked")?,
            likes: row.try_get("likes")?,
            creator_id: row.try_get("creator_id")?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }
}
