/// Authentication module
///
/// Password hashing, JWT issuance/verification, lockout policy, the role
/// hierarchy and the orchestrator that ties them to the stores.

mod claims;
mod jwt;
mod lockout;
mod password;
mod roles;
mod service;
mod session;

pub use claims::{AccessClaims, RefreshClaims, TokenClaims};
pub use jwt::{InvalidToken, TokenCodec};
pub use lockout::{is_locked, lockout_duration, locked_until, should_lock, LOCKOUT_THRESHOLD};
pub use password::CredentialHasher;
pub use roles::{has_permission, Role};
pub use service::{
    AuditPage, AuthResponse, AuthService, ChangePasswordRequest, Identity, LoginRequest,
    RefreshRequest, SignupRequest, TokenPair, UserPage, MAX_PAGE_SIZE,
};
pub use session::{hash_token, spawn_session_sweeper};
