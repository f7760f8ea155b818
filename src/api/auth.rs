/// Sign-in bookkeeping, access checks and access requests
use crate::{
    access::{AccessState, RequestOutcome},
    auth::{AuthContext, OptionalAuthContext},
    context::AppContext,
    db::User,
    error::GateResult,
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// Build auth routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/auth/signin", post(sign_in))
        .route("/api/auth/check", get(check))
        .route("/api/access/request", post(request_access))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignInResponse {
    pub success: bool,
}

/// Called by the identity verifier after each successful login.
///
/// Always reports success; bookkeeping failures are only logged.
async fn sign_in(State(ctx): State<AppContext>, auth: AuthContext) -> Json<SignInResponse> {
    ctx.access.sign_in(&auth.identity).await;
    Json(SignInResponse { success: true })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub approved: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// Report the caller's access state
async fn check(
    State(ctx): State<AppContext>,
    auth: OptionalAuthContext,
) -> GateResult<(StatusCode, Json<CheckResponse>)> {
    let state = ctx.access.evaluate(auth.external_id()).await?;

    let code = match state {
        AccessState::NotAuthenticated => StatusCode::UNAUTHORIZED,
        _ => StatusCode::OK,
    };
    let status = state.as_str().to_string();
    let (approved, user) = match state {
        AccessState::Active(user) => (true, Some(user)),
        _ => (false, None),
    };

    Ok((
        code,
        Json(CheckResponse {
            approved,
            status,
            user,
        }),
    ))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestAccessResponse {
    pub requested: bool,
    pub status: String,
}

/// Explicitly ask for access
async fn request_access(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> GateResult<Json<RequestAccessResponse>> {
    let outcome = ctx.access.request_access(&auth.identity).await?;

    let status = match &outcome {
        RequestOutcome::Created(_) | RequestOutcome::AlreadyPending => "pending".to_string(),
        RequestOutcome::RateLimited => "rate_limited".to_string(),
        RequestOutcome::AlreadyMember => ctx
            .access
            .evaluate(Some(auth.external_id()))
            .await?
            .as_str()
            .to_string(),
    };

    Ok(Json(RequestAccessResponse {
        requested: outcome.is_created(),
        status,
    }))
}
