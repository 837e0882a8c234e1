/// JWT Token Issuance and Verification
///
/// HS256 tokens signed with a server-held secret. Verification checks the
/// signature, issuer, exact expiry and required claims, and reports every
/// failure as the same [`InvalidToken`] value.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::{AccessClaims, RefreshClaims, TokenClaims};
use crate::auth::Role;
use crate::configuration::JwtSettings;
use crate::error::AppError;

/// A token failed verification. Deliberately carries no reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidToken;

#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl TokenCodec {
    pub fn new(secret: &str, issuer: impl Into<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
        }
    }

    pub fn from_settings(config: &JwtSettings) -> Self {
        Self::new(&config.secret, config.issuer.clone())
    }

    /// Issue a signed access token valid for `ttl`
    pub fn issue_access(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        role: Role,
        permissions: &[String],
        ttl: Duration,
    ) -> Result<String, AppError> {
        let now = Utc::now().timestamp();
        self.sign(&TokenClaims::Access(AccessClaims {
            sub: user_id,
            org_id,
            role,
            permissions: permissions.to_vec(),
            iat: now,
            exp: now + ttl.num_seconds(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4(),
        }))
    }

    /// Issue a signed refresh token bound to `session_id`, valid for `ttl`
    pub fn issue_refresh(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        session_id: Uuid,
        ttl: Duration,
    ) -> Result<String, AppError> {
        let now = Utc::now().timestamp();
        self.sign(&TokenClaims::Refresh(RefreshClaims {
            sub: user_id,
            org_id,
            session_id,
            iat: now,
            exp: now + ttl.num_seconds(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4(),
        }))
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Verify a token of either kind
    pub fn verify(&self, token: &str) -> Result<TokenClaims, InvalidToken> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = 0;

        decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("JWT validation error: {}", e);
                InvalidToken
            })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, InvalidToken> {
        match self.verify(token)? {
            TokenClaims::Access(claims) => Ok(claims),
            TokenClaims::Refresh(_) => Err(InvalidToken),
        }
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, InvalidToken> {
        match self.verify(token)? {
            TokenClaims::Refresh(claims) => Ok(claims),
            TokenClaims::Access(_) => Err(InvalidToken),
        }
    }
}
