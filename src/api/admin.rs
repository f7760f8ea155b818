/// Admin API Endpoints
///
/// Request review, user moderation, activity audit and the dashboard.
/// Every handler requires an identity in the configured admin set.
use crate::{
    access::{RequestStats, UserSummary},
    activity::{ActivityAction, ActivityEntry},
    analytics::Analytics,
    auth::AdminAuthContext,
    context::AppContext,
    db::{AccessRequest, RequestStatus, User, UserStatus},
    error::GateResult,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Build admin API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        // Access requests
        .route("/api/admin/requests", get(list_requests))
        .route("/api/admin/requests/:id/approve", post(approve_request))
        .route("/api/admin/requests/:id/deny", post(deny_request))
        // Users
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/users/:id/ban", post(ban_user))
        .route("/api/admin/users/:id/unban", post(unban_user))
        // Audit and dashboard
        .route("/api/admin/activity", get(list_activity))
        .route("/api/admin/analytics", get(analytics))
}

/// Treat a missing, empty or `all` filter as no filter
fn filter(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "all")
}

// ============================================================================
// Access requests
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListRequestsQuery {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListRequestsResponse {
    pub requests: Vec<AccessRequest>,
    pub stats: RequestStats,
}

async fn list_requests(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
    Query(query): Query<ListRequestsQuery>,
) -> GateResult<Json<ListRequestsResponse>> {
    let status = filter(&query.status).map(RequestStatus::from_str).transpose()?;
    let (requests, stats) = ctx.access.list_requests(status).await?;

    Ok(Json(ListRequestsResponse { requests, stats }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserActionResponse {
    pub success: bool,
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestActionResponse {
    pub success: bool,
    pub request: AccessRequest,
}

async fn approve_request(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<String>,
) -> GateResult<Json<UserActionResponse>> {
    let user = ctx.access.approve(&id, auth.external_id()).await?;
    Ok(Json(UserActionResponse {
        success: true,
        user,
    }))
}

async fn deny_request(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<String>,
) -> GateResult<Json<RequestActionResponse>> {
    let request = ctx.access.deny(&id, auth.external_id()).await?;
    Ok(Json(RequestActionResponse {
        success: true,
        request,
    }))
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListUsersQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    search: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListUsersResponse {
    pub users: Vec<UserSummary>,
    pub total: usize,
}

async fn list_users(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
    Query(query): Query<ListUsersQuery>,
) -> GateResult<Json<ListUsersResponse>> {
    let status = filter(&query.status).map(UserStatus::from_str).transpose()?;
    let users = ctx.access.list_users(status, query.search.as_deref()).await?;
    let total = users.len();

    Ok(Json(ListUsersResponse { users, total }))
}

async fn ban_user(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<String>,
) -> GateResult<Json<UserActionResponse>> {
    let user = ctx.access.ban(&id, auth.external_id()).await?;
    Ok(Json(UserActionResponse {
        success: true,
        user,
    }))
}

async fn unban_user(
    State(ctx): State<AppContext>,
    auth: AdminAuthContext,
    Path(id): Path<String>,
) -> GateResult<Json<UserActionResponse>> {
    let user = ctx.access.unban(&id, auth.external_id()).await?;
    Ok(Json(UserActionResponse {
        success: true,
        user,
    }))
}

// ============================================================================
// Activity and analytics
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListActivityQuery {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    action: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListActivityResponse {
    pub activities: Vec<ActivityEntry>,
    pub total: i64,
}

async fn list_activity(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
    Query(query): Query<ListActivityQuery>,
) -> GateResult<Json<ListActivityResponse>> {
    let action = filter(&query.action).map(ActivityAction::from_str).transpose()?;
    let (activities, total) = ctx.activity.list(query.limit, action).await?;

    Ok(Json(ListActivityResponse { activities, total }))
}

async fn analytics(
    State(ctx): State<AppContext>,
    _auth: AdminAuthContext,
) -> GateResult<Json<Analytics>> {
    let summary = ctx.analytics.summary().await?;
    Ok(Json(summary))
}
