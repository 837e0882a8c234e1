/// JWT Claims structures
///
/// Access and refresh tokens share a signing key, so the `type` claim tags
/// which kind a token is and each kind carries only what it needs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Role;

/// Claims carried by a short-lived access token
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    pub org_id: Uuid,
    pub role: Role,
    /// Permission snapshot at issuance
    pub permissions: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    /// Unique token ID; keeps token hashes distinct
    pub jti: Uuid,
}

/// Claims carried by a refresh token
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub org_id: Uuid,
    pub session_id: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TokenClaims {
    Access(AccessClaims),
    Refresh(RefreshClaims),
}
