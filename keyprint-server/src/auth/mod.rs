//! Session token issuance and request authentication
//!
//! The token layer is the hand-off target after a positive authentication
//! decision: it mints short-lived access tokens (15 minutes) and refresh
//! tokens (30 days, with a `jti` for later invalidation). Session
//! management beyond issuance is outside this service.
//!
//! Also provides the `AuthenticatedUser` extractor for the endpoints that
//! require a logged-in caller.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Access token lifetime (15 minutes)
const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
/// Refresh token lifetime (30 days)
const REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// JWT claims for issued tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Expiration time (validated by jsonwebtoken)
    pub exp: i64,
    /// Issued at
    pub iat: i64,
    /// "access" or "refresh"
    #[serde(rename = "type")]
    pub token_type: String,
    /// Token id, set on refresh tokens so they can be invalidated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// Tokens minted after a successful authentication decision
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// HS256 token issuer
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenIssuer {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint an access/refresh token pair for a user
    pub fn issue_session(&self, user_id: &str) -> Result<SessionTokens, ApiError> {
        Ok(SessionTokens {
            access_token: self.issue(user_id, "access", ACCESS_TOKEN_TTL_SECS, None)?,
            refresh_token: self.issue(
                user_id,
                "refresh",
                REFRESH_TOKEN_TTL_SECS,
                Some(uuid::Uuid::new_v4().to_string()),
            )?,
        })
    }

    /// Mint a single access token (used by tests to authenticate requests)
    pub fn issue_access(&self, user_id: &str) -> Result<String, ApiError> {
        self.issue(user_id, "access", ACCESS_TOKEN_TTL_SECS, None)
    }

    fn issue(
        &self,
        user_id: &str,
        token_type: &str,
        ttl_secs: i64,
        jti: Option<String>,
    ) -> Result<String, ApiError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + ttl_secs,
            iat: now,
            token_type: token_type.to_string(),
            jti,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::internal(format!("Token encoding failed: {e}")))
    }

    /// Validate an access token and return its claims
    pub fn verify_access(&self, token: &str) -> Result<Claims, ApiError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| ApiError::unauthorized(format!("Invalid token: {e}")))?;

        if data.claims.token_type != "access" {
            return Err(ApiError::unauthorized("Not an access token"));
        }
        Ok(data.claims)
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer").finish_non_exhaustive()
    }
}

/// Extractor for endpoints that require a logged-in user
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Expected Bearer token"))?;

        let claims = state.tokens.verify_access(token)?;
        Ok(Self {
            user_id: claims.sub,
        })
    }
}
