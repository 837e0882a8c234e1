/// Persistence seams for the auth core
///
/// The orchestrator only sees these traits. `PgAuthStore` backs them with
/// Postgres; `InMemoryStore` backs them with process memory for tests and
/// local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Role;
use crate::error::AppError;
use crate::models::{
    AuditLogEntry, AuditLogFilter, NewAuditLogEntry, NewSession, NewUser, Organization,
    ProfileUpdate, Session, User,
};

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgAuthStore;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;

    /// Insert a `pending` user. Fails with a unique-constraint error when the
    /// email is taken.
    async fn create_user(&self, new_user: NewUser) -> Result<User, AppError>;

    /// Promote a user to `active` and mark the email verified.
    async fn activate_user(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<User>, AppError>;

    /// Atomically increment the failed-login counter, returning the new value.
    async fn record_failed_login(&self, id: Uuid) -> Result<i32, AppError>;

    async fn lock_user(&self, id: Uuid, until: DateTime<Utc>) -> Result<(), AppError>;

    /// Reset the failed-login counter, clear any lock and stamp `last_login_at`.
    async fn record_successful_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;

    async fn touch_user_activity(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
        at: DateTime<Utc>,
    ) -> Result<Option<User>, AppError>;

    async fn update_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Swap in a stronger digest of the same password. Leaves
    /// `password_changed_at` untouched.
    async fn upgrade_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), AppError>;

    /// One page of an organization's users plus the total count.
    async fn list_users(
        &self,
        organization_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<User>, i64), AppError>;
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, AppError>;

    async fn permissions_for_role(&self, role: Role) -> Result<Vec<String>, AppError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, new_session: NewSession) -> Result<Session, AppError>;

    async fn find_active_session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Session>, AppError>;

    async fn find_active_session_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<Session>, AppError>;

    /// Point an active session at a newly issued access token (and optionally
    /// a new refresh token). Applies only while the session still holds
    /// `presented_refresh_hash`; returns false otherwise.
    async fn rotate_session_tokens(
        &self,
        session_id: Uuid,
        presented_refresh_hash: &str,
        token_hash: &str,
        refresh_token_hash: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Revoke every active session of a user, returning how many changed.
    async fn revoke_user_sessions(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64, AppError>;

    /// Mark active sessions past `expires_at` as expired.
    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: NewAuditLogEntry) -> Result<(), AppError>;

    async fn list_entries(
        &self,
        organization_id: Uuid,
        filter: &AuditLogFilter,
    ) -> Result<(Vec<AuditLogEntry>, i64), AppError>;
}

/// The set of store handles the orchestrator depends on
#[derive(Clone)]
pub struct AuthStores {
    pub users: Arc<dyn UserStore>,
    pub tenants: Arc<dyn TenantStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub audit: Arc<dyn AuditLog>,
}

impl AuthStores {
    /// Use one backend for every concern.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: UserStore + TenantStore + SessionStore + AuditLog + 'static,
    {
        Self {
            users: store.clone(),
            tenants: store.clone(),
            sessions: store.clone(),
            audit: store,
        }
    }
}
