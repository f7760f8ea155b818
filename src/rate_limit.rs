/// Rate Limiting System
use crate::error::{GateError, GateResult};
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per second for authenticated users
    pub authenticated_rps: u32,
    /// Requests per second for unauthenticated users
    pub unauthenticated_rps: u32,
    /// Requests per second for admin endpoints
    pub admin_rps: u32,
    /// Burst size
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            authenticated_rps: 50,
            unauthenticated_rps: 10,
            admin_rps: 200,
            burst_size: 50,
        }
    }
}

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn quota(rps: u32, burst: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(rps).unwrap_or(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN))
}

fn check(limiter: &DirectLimiter) -> GateResult<()> {
    limiter.check().map_err(|_| GateError::RateLimitExceeded {
        retry_after: Duration::from_secs(1),
    })
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    authenticated: Arc<DirectLimiter>,
    unauthenticated: Arc<DirectLimiter>,
    admin: Arc<DirectLimiter>,
    authenticated_rps: u32,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let auth_quota = quota(config.authenticated_rps, config.burst_size);
        let unauth_quota = quota(config.unauthenticated_rps, config.burst_size / 5);
        let admin_quota = quota(config.admin_rps, config.burst_size.saturating_mul(2));

        Self {
            authenticated: Arc::new(GovernorLimiter::direct(auth_quota)),
            unauthenticated: Arc::new(GovernorLimiter::direct(unauth_quota)),
            admin: Arc::new(GovernorLimiter::direct(admin_quota)),
            authenticated_rps: config.authenticated_rps,
        }
    }

    /// Check rate limit for authenticated user
    pub fn check_authenticated(&self) -> GateResult<()> {
        check(&self.authenticated)
    }

    /// Check rate limit for unauthenticated user
    pub fn check_unauthenticated(&self) -> GateResult<()> {
        check(&self.unauthenticated)
    }

    /// Check rate limit for admin endpoints
    pub fn check_admin(&self) -> GateResult<()> {
        check(&self.admin)
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Response {
    if !ctx.config.rate_limit.enabled {
        return next.run(request).await;
    }

    let is_admin = request.uri().path().starts_with("/api/admin");
    let has_auth_header = request.headers().get("authorization").is_some();

    // Apply appropriate rate limit based on context
    let result = if is_admin && has_auth_header {
        ctx.rate_limiter.check_admin()
    } else if has_auth_header {
        ctx.rate_limiter.check_authenticated()
    } else {
        ctx.rate_limiter.check_unauthenticated()
    };

    match result {
        Ok(()) => {
            let mut response = next.run(request).await;
            response.headers_mut().insert(
                "X-RateLimit-Limit",
                HeaderValue::from(ctx.rate_limiter.authenticated_rps),
            );
            response
        }
        Err(e) => {
            tracing::debug!("Rate limit exceeded for {}", request.uri().path());
            e.into_response()
        }
    }
}
