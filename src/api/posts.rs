/// Feed and post endpoints
use crate::{
    auth::{AdminAuthContext, AuthContext, OptionalAuthContext},
    content::{LikeOutcome, NewPost, PostUpdate},
    context::AppContext,
    db::Post,
    error::GateResult,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Build post routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/posts", get(list_posts).post(create_post))
        .route("/api/posts/:id", put(update_post).delete(delete_post))
        .route("/api/posts/:id/like", post(toggle_like))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostsResponse {
    pub posts: Vec<Post>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Feed for the caller; locked posts only reach active users
async fn list_posts(
    State(ctx): State<AppContext>,
    auth: OptionalAuthContext,
) -> GateResult<Json<PostsResponse>> {
    let posts = ctx.content.list_visible_posts(auth.external_id()).await?;
    Ok(Json(PostsResponse { posts }))
}

async fn create_post(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Json(req): Json<NewPost>,
) -> GateResult<(StatusCode, Json<Post>)> {
    let post = ctx.content.create_post(auth.external_id(), req).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

async fn update_post(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<String>,
    Json(req): Json<PostUpdate>,
) -> GateResult<Json<Post>> {
    let post = ctx.content.update_post(&id, req, auth.external_id()).await?;
    Ok(Json(post))
}

async fn delete_post(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<String>,
) -> GateResult<Json<SuccessResponse>> {
    ctx.content.delete_post(&id, auth.external_id()).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Like or unlike a post. Locked posts are hidden from non-members.
async fn toggle_like(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> GateResult<Json<LikeOutcome>> {
    let outcome = ctx.content.toggle_like(&id, auth.external_id()).await?;
    Ok(Json(outcome))
}
