/// Content Gate
///
/// Serves the post feed filtered by the viewer's approval state, applies
/// like toggles, and backs admin post management.
use crate::{
    activity::{self, ActivityAction},
    db::{models::timestamp, Post},
    error::{GateError, GateResult},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;
use validator::{Validate, ValidateUrl};

/// New post submitted by an admin
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    #[validate(length(min = 1, max = 5000))]
    pub content: String,
    #[validate(url)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_locked: bool,
}

/// Partial post update; absent fields are left unchanged.
///
/// An explicit `imageUrl: null` clears the image; an absent field keeps it.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PostUpdate {
    #[validate(length(min = 1, max = 5000))]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub image_url: Option<Option<String>>,
    pub is_locked: Option<bool>,
}

/// Distinguish an explicit `null` from an absent field
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}


/// Result of a like toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    pub liked: bool,
    pub total_likes: i64,
}

fn validate<T: Validate>(input: &T) -> GateResult<()> {
    input
        .validate()
        .map_err(|e| GateError::Validation(e.to_string()))
}

/// Content gate
#[derive(Clone)]
pub struct ContentGate {
    db: SqlitePool,
}

impl ContentGate {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Whether the external id belongs to an active user
    async fn viewer_is_active(&self, external_id: &str) -> GateResult<bool> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM app_user WHERE external_id = ?")
                .bind(external_id)
                .fetch_optional(&self.db)
                .await?;

        Ok(status.as_deref() == Some("active"))
    }

    /// Posts visible to a viewer, newest first.
    ///
    /// Locked posts are only returned to active users.
    pub async fn list_visible_posts(&self, viewer: Option<&str>) -> GateResult<Vec<Post>> {
        let include_locked = match viewer {
            Some(external_id) => self.viewer_is_active(external_id).await?,
            None => false,
        };

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM post
            WHERE (?1 OR is_locked = 0)
            ORDER BY created_at DESC, rowid DESC
            "#,
            Post::COLUMNS
        ))
        .bind(include_locked)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Post::from_row).collect()
    }

    /// Get a post by id regardless of lock state
    pub async fn get_post(&self, post_id: &str) -> GateResult<Option<Post>> {
        let row = sqlx::query(&format!("SELECT {} FROM post WHERE id = ?", Post::COLUMNS))
            .bind(post_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(Post::from_row).transpose()
    }

    /// Like or unlike a post.
    ///
    /// The liker set and the counter change in one transaction; the liker
    /// set row decides the direction so concurrent toggles cannot drift the
    /// counter.
    pub async fn toggle_like(&self, post_id: &str, external_id: &str) -> GateResult<LikeOutcome> {
        let post = self
            .get_post(post_id)
            .await?
            .ok_or_else(|| GateError::NotFound(format!("Post {} not found", post_id)))?;

        // Locked posts don't exist for viewers who can't see them
        if post.is_locked && !self.viewer_is_active(external_id).await? {
            return Err(GateError::NotFound(format!("Post {} not found", post_id)));
        }

        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO post_like (post_id, external_id, liked_at)
            SELECT id, ?, ? FROM post WHERE id = ?
            "#,
        )
        .bind(external_id)
        .bind(timestamp(Utc::now()))
        .bind(post_id)
        .execute(&mut *tx)
        .await?;

        let liked = if inserted.rows_affected() == 1 {
            true
        } else {
            let removed = sqlx::query("DELETE FROM post_like WHERE post_id = ? AND external_id = ?")
                .bind(post_id)
                .bind(external_id)
                .execute(&mut *tx)
                .await?;

            if removed.rows_affected() == 0 {
                // Deleted between the lookup and the toggle
                return Err(GateError::NotFound(format!("Post {} not found", post_id)));
            }
            false
        };

        let delta: i64 = if liked { 1 } else { -1 };
        let row = sqlx::query("UPDATE post SET likes = likes + ? WHERE id = ? RETURNING likes")
            .bind(delta)
            .bind(post_id)
            .fetch_one(&mut *tx)
            .await?;
        let total_likes: i64 = row.try_get("likes")?;

        if liked {
            activity::append(
                &mut *tx,
                Some(external_id),
                ActivityAction::LikedPost,
                &json!({ "postId": post_id }),
            )
            .await?;
        }

        tx.commit().await?;

        Ok(LikeOutcome { liked, total_likes })
    }

    /// Create a post
    pub async fn create_post(&self, creator_id: &str, new_post: NewPost) -> GateResult<Post> {
        validate(&new_post)?;

        let now = Utc::now();
        let post = Post {
            id: Uuid::new_v4().to_string(),
            content: new_post.content,
            image_url: new_post.image_url,
            is_locked: new_post.is_locked,
            likes: 0,
            creator_id: creator_id.to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO post (id, content, image_url, is_locked, likes, creator_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.content)
        .bind(&post.image_url)
        .bind(post.is_locked)
        .bind(&post.creator_id)
        .bind(timestamp(now))
        .bind(timestamp(now))
        .execute(&mut *tx)
        .await?;

        activity::append(
            &mut *tx,
            Some(creator_id),
            ActivityAction::CreatedPost,
            &json!({ "postId": post.id, "isLocked": post.is_locked }),
        )
        .await?;

        tx.commit().await?;

        info!("Post {} created by {}", post.id, creator_id);
        Ok(post)
    }

    /// Apply a partial update to a post
    pub async fn update_post(
        &self,
        post_id: &str,
        update: PostUpdate,
        editor_id: &str,
    ) -> GateResult<Post> {
        validate(&update)?;
        if let Some(Some(url)) = &update.image_url {
            if !url.validate_url() {
                return Err(GateError::Validation(format!("Invalid image URL: {}", url)));
            }
        }

        let mut tx = self.db.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE post
            SET content = COALESCE(?1, content),
                image_url = CASE WHEN ?2 THEN ?3 ELSE image_url END,
                is_locked = COALESCE(?4, is_locked),
                updated_at = ?5
            WHERE id = ?6
            RETURNING {}
            "#,
            Post::COLUMNS
        ))
        .bind(&update.content)
        .bind(update.image_url.is_some())
        .bind(update.image_url.flatten())
        .bind(update.is_locked)
        .bind(timestamp(Utc::now()))
        .bind(post_id)
        .fetch_optional(&mut *tx)
        .await?;

        let post = match row {
            Some(row) => Post::from_row(&row)?,
            None => return Err(GateError::NotFound(format!("Post {} not found", post_id))),
        };

        activity::append(
            &mut *tx,
            Some(editor_id),
            ActivityAction::UpdatedPost,
            &json!({ "postId": post.id }),
        )
        .await?;

        tx.commit().await?;
        Ok(post)
    }

    /// Delete a post together with its likes
    pub async fn delete_post(&self, post_id: &str, admin_id: &str) -> GateResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM post_like WHERE post_id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM post WHERE id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GateError::NotFound(format!("Post {} not found", post_id)));
        }

        activity::append(
            &mut *tx,
            Some(admin_id),
            ActivityAction::DeletedPost,
            &json!({ "postId": post_id }),
        )
        .await?;

        tx.commit().await?;

        info!("Post {} deleted by {}", post_id, admin_id);
        Ok(())
    }
}
