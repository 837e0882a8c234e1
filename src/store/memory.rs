use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{AuditLog, SessionStore, TenantStore, UserStore};
use crate::auth::Role;
use crate::error::{AppError, DatabaseError};
use crate::models::{
    AuditLogEntry, AuditLogFilter, NewAuditLogEntry, NewSession, NewUser, Organization,
    ProfileUpdate, Session, SessionStatus, User, UserStatus,
};

#[derive(Default)]
struct State {
    organizations: HashMap<Uuid, Organization>,
    role_permissions: HashMap<Role, Vec<String>>,
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
    audit: Vec<AuditLogEntry>,
}

/// Process-local store with the same conditional-update semantics as the
/// Postgres store. Every operation runs under a single mutex.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_organization(&self, organization: Organization) {
        self.state()
            .organizations
            .insert(organization.id, organization);
    }

    pub fn grant_permissions(&self, role: Role, permissions: &[&str]) {
        self.state()
            .role_permissions
            .entry(role)
            .or_default()
            .extend(permissions.iter().map(|p| p.to_string()));
    }

    /// Administrative status change, outside the self-service surface.
    pub fn set_user_status(&self, user_id: Uuid, status: UserStatus) {
        if let Some(user) = self.state().users.get_mut(&user_id) {
            user.status = status;
        }
    }

    /// Administrative role change, outside the self-service surface.
    pub fn set_user_role(&self, user_id: Uuid, role: Role) {
        if let Some(user) = self.state().users.get_mut(&user_id) {
            user.role = role;
        }
    }

    /// Move a session's expiry without touching its status, as if the
    /// sweeper had not run yet.
    pub fn set_session_expiry(&self, session_id: Uuid, expires_at: DateTime<Utc>) {
        if let Some(session) = self.state().sessions.get_mut(&session_id) {
            session.expires_at = expires_at;
        }
    }

    pub fn sessions_for_user(&self, user_id: Uuid) -> Vec<Session> {
        self.state()
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.state().audit.clone()
    }
}

fn transition(session: &mut Session, next: SessionStatus, at: Option<DateTime<Utc>>) -> bool {
    if !session.status.can_transition_to(next) {
        return false;
    }
    session.status = next;
    if let Some(at) = at {
        session.last_activity_at = at;
    }
    true
}

fn page<T: Clone>(items: &[T], offset: i64, limit: i64) -> Vec<T> {
    items
        .iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .state()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.state().users.get(&id).cloned())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, AppError> {
        let mut state = self.state();
        if state.users.values().any(|u| u.email == new_user.email) {
            return Err(
                DatabaseError::UniqueConstraintViolation("users_email_key".to_string()).into(),
            );
        }
        let user = new_user.into_user(Utc::now());
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn activate_user(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<User>, AppError> {
        Ok(self.state().users.get_mut(&id).map(|user| {
            user.status = UserStatus::Active;
            user.email_verified_at = Some(at);
            user.updated_at = at;
            user.clone()
        }))
    }

    async fn record_failed_login(&self, id: Uuid) -> Result<i32, AppError> {
        let mut state = self.state();
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::Internal(format!("user {} vanished", id)))?;
        user.failed_login_attempts += 1;
        Ok(user.failed_login_attempts)
    }

    async fn lock_user(&self, id: Uuid, until: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(user) = self.state().users.get_mut(&id) {
            user.locked_until = Some(until);
        }
        Ok(())
    }

    async fn record_successful_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(user) = self.state().users.get_mut(&id) {
            user.failed_login_attempts = 0;
            user.locked_until = None;
            user.last_login_at = Some(at);
            user.last_activity_at = at;
            user.updated_at = at;
        }
        Ok(())
    }

    async fn touch_user_activity(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(user) = self.state().users.get_mut(&id) {
            user.last_activity_at = at;
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
        at: DateTime<Utc>,
    ) -> Result<Option<User>, AppError> {
        Ok(self.state().users.get_mut(&id).map(|user| {
            update.apply_to(user);
            user.updated_at = at;
            user.clone()
        }))
    }

    async fn update_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if let Some(user) = self.state().users.get_mut(&id) {
            user.password_hash = password_hash.to_string();
            user.password_changed_at = at;
            user.updated_at = at;
        }
        Ok(())
    }

    async fn upgrade_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), AppError> {
        if let Some(user) = self.state().users.get_mut(&id) {
            user.password_hash = password_hash.to_string();
        }
        Ok(())
    }

    async fn list_users(
        &self,
        organization_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<User>, i64), AppError> {
        let state = self.state();
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| u.organization_id == organization_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
        let total = users.len() as i64;
        Ok((page(&users, offset, limit), total))
    }
}

#[async_trait]
impl TenantStore for InMemoryStore {
    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, AppError> {
        Ok(self.state().organizations.get(&id).cloned())
    }

    async fn permissions_for_role(&self, role: Role) -> Result<Vec<String>, AppError> {
        Ok(self
            .state()
            .role_permissions
            .get(&role)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(&self, new_session: NewSession) -> Result<Session, AppError> {
        let mut state = self.state();
        if state.sessions.values().any(|s| {
            s.token_hash == new_session.token_hash
                || s.refresh_token_hash == new_session.refresh_token_hash
        }) {
            return Err(
                DatabaseError::UniqueConstraintViolation("user_sessions_token_hash_key".to_string())
                    .into(),
            );
        }
        let session = new_session.into_session(Utc::now());
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_active_session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Session>, AppError> {
        Ok(self
            .state()
            .sessions
            .values()
            .find(|s| s.token_hash == token_hash && s.status == SessionStatus::Active)
            .cloned())
    }

    async fn find_active_session_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<Session>, AppError> {
        Ok(self
            .state()
            .sessions
            .values()
            .find(|s| {
                s.refresh_token_hash == refresh_token_hash && s.status == SessionStatus::Active
            })
            .cloned())
    }

    async fn rotate_session_tokens(
        &self,
        session_id: Uuid,
        presented_refresh_hash: &str,
        token_hash: &str,
        refresh_token_hash: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state();
        match state.sessions.get_mut(&session_id) {
            Some(session)
                if session.status == SessionStatus::Active
                    && session.refresh_token_hash == presented_refresh_hash =>
            {
                session.token_hash = token_hash.to_string();
                if let Some(refresh_hash) = refresh_token_hash {
                    session.refresh_token_hash = refresh_hash.to_string();
                }
                session.last_activity_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut state = self.state();
        let revoked = state
            .sessions
            .values_mut()
            .filter(|s| s.user_id == user_id)
            .map(|s| transition(s, SessionStatus::Revoked, Some(at)))
            .filter(|changed| *changed)
            .count();
        Ok(revoked as u64)
    }

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut state = self.state();
        let expired = state
            .sessions
            .values_mut()
            .filter(|s| s.expires_at < now)
            .map(|s| transition(s, SessionStatus::Expired, None))
            .filter(|changed| *changed)
            .count();
        Ok(expired as u64)
    }
}

#[async_trait]
impl AuditLog for InMemoryStore {
    async fn append(&self, entry: NewAuditLogEntry) -> Result<(), AppError> {
        self.state().audit.push(entry.into_entry(Utc::now()));
        Ok(())
    }

    async fn list_entries(
        &self,
        organization_id: Uuid,
        filter: &AuditLogFilter,
    ) -> Result<(Vec<AuditLogEntry>, i64), AppError> {
        let state = self.state();
        let mut entries: Vec<AuditLogEntry> = state
            .audit
            .iter()
            .filter(|e| e.organization_id == organization_id && filter.matches(e))
            .cloned()
            .collect();
        entries.reverse();
        let total = entries.len() as i64;
        Ok((page(&entries, filter.offset, filter.limit), total))
    }
}
