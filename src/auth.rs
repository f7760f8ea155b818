/// Authentication extractors and utilities
///
/// The external identity verifier completes the OAuth flow and hands the
/// verified identity over as an HS256 session token signed with the shared
/// secret. Every extractor here only verifies that token.
use crate::{context::AppContext, db::Identity, error::GateError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Stable external id
    pub sub: String,
    pub username: String,
    #[serde(default = "default_discriminator")]
    pub discriminator: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

fn default_discriminator() -> String {
    "0".to_string()
}

impl SessionClaims {
    pub fn for_identity(identity: &Identity, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: identity.external_id.clone(),
            username: identity.username.clone(),
            discriminator: identity.discriminator.clone(),
            email: identity.email.clone(),
            avatar: identity.avatar.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    pub fn into_identity(self) -> Identity {
        Identity {
            external_id: self.sub,
            username: self.username,
            discriminator: self.discriminator,
            email: self.email,
            avatar: self.avatar,
        }
    }
}

/// Sign a session token for an identity
pub fn issue_session_token(
    identity: &Identity,
    jwt_secret: &str,
    ttl: Duration,
) -> Result<String, GateError> {
    let claims = SessionClaims::for_identity(identity, ttl);
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| GateError::Jwt(e.to_string()))
}

/// Verify a session token with full validation
///
/// This performs:
/// 1. JWT signature verification
/// 2. Expiration checking
/// 3. Claims decoding
pub fn verify_session_token(token: &str, jwt_secret: &str) -> Result<SessionClaims, GateError> {
    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    // Allow some clock skew (1 minute)
    validation.leeway = 60;

    decode::<SessionClaims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("Session token verification failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    GateError::Authentication("Token has expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    GateError::Authentication("Invalid token signature".to_string())
                }
                _ => GateError::Authentication(format!("Invalid token: {}", e)),
            }
        })
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Authenticated context - a verified identity
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub identity: Identity,
}

impl AuthContext {
    pub fn external_id(&self) -> &str {
        &self.identity.external_id
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = GateError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| GateError::Authentication("Missing authorization header".to_string()))?;

        let claims = verify_session_token(token, &state.config.authentication.jwt_secret)?;

        Ok(AuthContext {
            identity: claims.into_identity(),
        })
    }
}

/// Optional authenticated context - anonymous when no valid token is present
#[derive(Debug, Clone)]
pub struct OptionalAuthContext {
    pub auth: Option<AuthContext>,
}

impl OptionalAuthContext {
    pub fn external_id(&self) -> Option<&str> {
        self.auth.as_ref().map(AuthContext::external_id)
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for OptionalAuthContext {
    type Rejection = GateError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let auth = extract_bearer_token(&parts.headers)
            .and_then(|token| {
                verify_session_token(token, &state.config.authentication.jwt_secret).ok()
            })
            .map(|claims| AuthContext {
                identity: claims.into_identity(),
            });

        Ok(OptionalAuthContext { auth })
    }
}

/// Admin authentication context - identity must be in the admin set
#[derive(Debug, Clone)]
pub struct AdminAuthContext {
    pub identity: Identity,
}

impl AdminAuthContext {
    pub fn external_id(&self) -> &str {
        &self.identity.external_id
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminAuthContext {
    type Rejection = GateError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthContext::from_request_parts(parts, state).await?;

        if !state.access.is_admin(auth.external_id()) {
            tracing::warn!("AdminAuthContext: {} is not an admin", auth.external_id());
            return Err(GateError::Authorization("Admin only".to_string()));
        }

        tracing::debug!("AdminAuthContext: {} authorized as admin", auth.external_id());

        Ok(AdminAuthContext {
            identity: auth.identity,
        })
    }
}
