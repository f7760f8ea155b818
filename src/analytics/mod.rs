/// Admin dashboard aggregates
use crate::{
    activity::{ActivityEntry, ActivityLog},
    db::{models::timestamp, Post},
    error::GateResult,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

const RECENT_ACTIVITY: i64 = 10;
const TOP_POSTS: i64 = 5;
const GROWTH_DAYS: i64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    /// Active users only
    pub total_users: i64,
    pub pending_requests: i64,
    pub total_posts: i64,
    pub total_likes: i64,
}

/// Users created on one UTC day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub stats: DashboardStats,
    pub recent_activity: Vec<ActivityEntry>,
    pub user_growth: Vec<DailyCount>,
    pub top_posts: Vec<Post>,
}

/// Analytics service
#[derive(Clone)]
pub struct AnalyticsService {
    db: SqlitePool,
    activity: ActivityLog,
}

impl AnalyticsService {
    pub fn new(db: SqlitePool, activity: ActivityLog) -> Self {
        Self { db, activity }
    }

    pub async fn stats(&self) -> GateResult<DashboardStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM app_user WHERE status = 'active') AS total_users,
                (SELECT COUNT(*) FROM access_request WHERE status = 'pending') AS pending_requests,
                (SELECT COUNT(*) FROM post) AS total_posts,
                (SELECT COALESCE(SUM(likes), 0) FROM post) AS total_likes
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        Ok(DashboardStats {
            total_users: row.try_get("total_users")?,
            pending_requests: row.try_get("pending_requests")?,
            total_posts: row.try_get("total_posts")?,
            total_likes: row.try_get("total_likes")?,
        })
    }

    /// New users per day over the last 30 days, oldest day first
    pub async fn user_growth(&self) -> GateResult<Vec<DailyCount>> {
        let since = timestamp(Utc::now() - Duration::days(GROWTH_DAYS));

        let rows = sqlx::query(
            r#"
            SELECT substr(created_at, 1, 10) AS day, COUNT(*) AS count
            FROM app_user
            WHERE created_at >= ?
            GROUP BY day
            ORDER BY day ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| -> GateResult<DailyCount> {
                Ok(DailyCount {
                    date: row.try_get("day")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    pub async fn top_posts(&self) -> GateResult<Vec<Post>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM post ORDER BY likes DESC, created_at DESC LIMIT ?",
            Post::COLUMNS
        ))
        .bind(TOP_POSTS)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Post::from_row).collect()
    }

    /// Full dashboard summary
    pub async fn summary(&self) -> GateResult<Analytics> {
        let stats = self.stats().await?;
        let (recent_activity, _) = self.activity.list(Some(RECENT_ACTIVITY), None).await?;
        let user_growth = self.user_growth().await?;
        let top_posts = self.top_posts().await?;

        Ok(Analytics {
            stats,
            recent_activity,
            user_growth,
            top_posts,
        })
    }
}
