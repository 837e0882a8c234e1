/// Authentication orchestrator
///
/// Composes the credential hasher, token codec, lockout policy and the
/// stores into the signup, login, refresh, logout and identity flows. All
/// collaborators are injected so tests can run against `InMemoryStore`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::claims::AccessClaims;
use crate::auth::jwt::TokenCodec;
use crate::auth::lockout;
use crate::auth::password::CredentialHasher;
use crate::auth::roles::{has_permission, Role};
use crate::auth::session::hash_token;
use crate::configuration::{JwtSettings, SignupSettings};
use crate::error::{AppError, AuthError, DatabaseError, ValidationError};
use crate::models::{
    AuditLogEntry, AuditLogFilter, NewAuditLogEntry, NewSession, NewUser, Organization,
    ProfileUpdate, User, UserProfile,
};
use crate::request_metadata::RequestMetadata;
use crate::store::AuthStores;
use crate::validators::{
    is_valid_email, is_valid_name, passwords_match, validate_password_strength,
};

pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Payload returned by signup and login. `tokens` is absent when signup
/// leaves the account pending.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserProfile,
    pub organization: Organization,
    pub tokens: Option<TokenPair>,
    pub permissions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct UserPage {
    pub users: Vec<UserProfile>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct AuditPage {
    pub entries: Vec<AuditLogEntry>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

/// The authenticated caller of a request
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: User,
    pub claims: AccessClaims,
    pub session_id: Uuid,
}

impl Identity {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }

    pub fn organization_id(&self) -> Uuid {
        self.user.organization_id
    }

    pub fn require_role(&self, required: Role) -> Result<(), AppError> {
        if self.user.role.satisfies(required) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("role: {}", required)))
        }
    }

    /// Checks the permission snapshot carried in the access token.
    pub fn require_permission(&self, permission: &str) -> Result<(), AppError> {
        if has_permission(&self.claims.permissions, permission) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("permission: {}", permission)))
        }
    }
}

pub struct AuthService {
    hasher: CredentialHasher,
    tokens: TokenCodec,
    stores: AuthStores,
    jwt: JwtSettings,
    signup: SignupSettings,
}

impl AuthService {
    pub fn new(
        hasher: CredentialHasher,
        tokens: TokenCodec,
        stores: AuthStores,
        jwt: JwtSettings,
        signup: SignupSettings,
    ) -> Self {
        Self {
            hasher,
            tokens,
            stores,
            jwt,
            signup,
        }
    }

    pub fn stores(&self) -> &AuthStores {
        &self.stores
    }

    fn access_ttl(&self) -> Duration {
        Duration::seconds(self.jwt.access_token_expiry)
    }

    /// Register a new account in a resolved, active organization.
    pub async fn signup(
        &self,
        request: SignupRequest,
        meta: &RequestMetadata,
    ) -> Result<AuthResponse, AppError> {
        let email = is_valid_email(&request.email)?;
        let first_name = is_valid_name("first_name", &request.first_name)?;
        let last_name = is_valid_name("last_name", &request.last_name)?;
        validate_password_strength(&request.password)?;
        passwords_match(&request.password, &request.confirm_password)?;

        if self.stores.users.find_user_by_email(&email).await?.is_some() {
            return Err(duplicate_email());
        }

        let organization = self.resolve_organization(request.organization_id).await?;
        let password_hash = self.hasher.hash(&request.password)?;

        let mut user = self
            .stores
            .users
            .create_user(NewUser {
                organization_id: organization.id,
                email,
                password_hash,
                first_name,
                last_name,
                role: Role::StaffUser,
            })
            .await
            .map_err(|e| match e {
                AppError::Database(DatabaseError::UniqueConstraintViolation(_)) => {
                    duplicate_email()
                }
                other => other,
            })?;

        let permissions = self.stores.tenants.permissions_for_role(user.role).await?;

        let now = Utc::now();
        if self.signup.auto_activate {
            let user_id = user.id;
            user = self
                .stores
                .users
                .activate_user(user_id, now)
                .await?
                .ok_or_else(|| {
                    AppError::Internal(format!("user {} vanished during signup", user_id))
                })?;
        }

        // The account is committed from here on; if opening the session
        // fails the caller recovers through /login, not a second signup.
        self.audit(
            NewAuditLogEntry::user_action(user.id, organization.id, "user_signup")
                .with_values(
                    None,
                    Some(serde_json::json!({ "email": user.email, "role": user.role })),
                )
                .with_client(meta.ip_address.clone(), meta.user_agent.clone()),
        )
        .await;

        let tokens = if self.signup.auto_activate {
            Some(self.open_session(&user, &permissions, false, meta, now).await?)
        } else {
            None
        };

        tracing::info!(
            user_id = %user.id,
            organization_id = %organization.id,
            status = %user.status,
            "User signed up"
        );

        Ok(AuthResponse {
            user: user.profile(),
            organization,
            tokens,
            permissions,
        })
    }

    async fn resolve_organization(
        &self,
        requested: Option<Uuid>,
    ) -> Result<Organization, AppError> {
        let organization_id = requested
            .or(self.signup.default_organization_id)
            .ok_or_else(|| ValidationError::EmptyField("organization_id".to_string()))?;

        match self.stores.tenants.find_organization(organization_id).await? {
            Some(org) if org.is_active => Ok(org),
            _ => Err(ValidationError::Invalid("Invalid organization".to_string()).into()),
        }
    }

    /// Authenticate with email and password, applying the lockout policy.
    pub async fn login(
        &self,
        request: LoginRequest,
        meta: &RequestMetadata,
    ) -> Result<AuthResponse, AppError> {
        let email = is_valid_email(&request.email)?;
        let now = Utc::now();

        let mut user = match self.stores.users.find_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                tracing::info!("Login attempt for unknown account");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if lockout::is_locked(user.locked_until, now) {
            tracing::warn!(user_id = %user.id, "Login attempt on locked account");
            return Err(AuthError::AccountLocked.into());
        }

        if !self.hasher.verify(&request.password, &user.password_hash) {
            let failed = self.stores.users.record_failed_login(user.id).await?;
            if let Some(until) = lockout::locked_until(failed, now) {
                self.stores.users.lock_user(user.id, until).await?;
                tracing::warn!(
                    user_id = %user.id,
                    failed_attempts = failed,
                    locked_until = %until,
                    "Account locked after failed logins"
                );
            } else {
                tracing::info!(user_id = %user.id, failed_attempts = failed, "Failed login");
            }
            return Err(AuthError::InvalidCredentials.into());
        }

        self.stores
            .users
            .record_successful_login(user.id, now)
            .await?;
        user.failed_login_attempts = 0;
        user.locked_until = None;
        user.last_login_at = Some(now);
        user.last_activity_at = now;

        if !user.is_active() {
            tracing::warn!(user_id = %user.id, status = %user.status, "Login to inactive account");
            return Err(AuthError::AccountInactive.into());
        }

        if self.hasher.needs_rehash(&user.password_hash) {
            let upgraded = self.hasher.hash(&request.password)?;
            self.stores
                .users
                .upgrade_password_hash(user.id, &upgraded)
                .await?;
            user.password_hash = upgraded;
            tracing::info!(user_id = %user.id, "Upgraded legacy password digest");
        }

        let organization = self
            .stores
            .tenants
            .find_organization(user.organization_id)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!("organization of user {} is missing", user.id))
            })?;
        let permissions = self.stores.tenants.permissions_for_role(user.role).await?;
        let tokens = self
            .open_session(&user, &permissions, request.remember_me, meta, now)
            .await?;

        self.audit(
            NewAuditLogEntry::user_action(user.id, user.organization_id, "user_login")
                .with_client(meta.ip_address.clone(), meta.user_agent.clone()),
        )
        .await;

        tracing::info!(user_id = %user.id, remember_me = request.remember_me, "User logged in");

        Ok(AuthResponse {
            user: user.profile(),
            organization,
            tokens: Some(tokens),
            permissions,
        })
    }

    async fn open_session(
        &self,
        user: &User,
        permissions: &[String],
        remember_me: bool,
        meta: &RequestMetadata,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, AppError> {
        let session_id = Uuid::new_v4();
        let refresh_ttl = Duration::seconds(self.jwt.refresh_expiry(remember_me));

        let access_token = self.tokens.issue_access(
            user.id,
            user.organization_id,
            user.role,
            permissions,
            self.access_ttl(),
        )?;
        let refresh_token =
            self.tokens
                .issue_refresh(user.id, user.organization_id, session_id, refresh_ttl)?;

        self.stores
            .sessions
            .create_session(NewSession {
                id: session_id,
                user_id: user.id,
                token_hash: hash_token(&access_token),
                refresh_token_hash: hash_token(&refresh_token),
                ip_address: meta.ip_address.clone(),
                user_agent: meta.user_agent.clone(),
                expires_at: now + refresh_ttl,
            })
            .await?;

        tracing::debug!(user_id = %user.id, session_id = %session_id, "Session opened");

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in: self.jwt.access_token_expiry,
        })
    }

    /// Mint a new access token for a live session.
    ///
    /// The refresh token is echoed back unless rotation is enabled, in which
    /// case a replacement with the same expiry is issued and the presented
    /// one stops working.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let unauthenticated = || AppError::Auth(AuthError::Unauthenticated);
        let now = Utc::now();

        let claims = self
            .tokens
            .verify_refresh(refresh_token)
            .map_err(|_| unauthenticated())?;

        let presented_hash = hash_token(refresh_token);
        let session = self
            .stores
            .sessions
            .find_active_session_by_refresh_hash(&presented_hash)
            .await?
            .filter(|s| s.is_usable(now) && s.id == claims.session_id && s.user_id == claims.sub)
            .ok_or_else(unauthenticated)?;

        let user = self
            .stores
            .users
            .find_user_by_id(claims.sub)
            .await?
            .filter(User::is_active)
            .ok_or_else(unauthenticated)?;

        let permissions = self.stores.tenants.permissions_for_role(user.role).await?;
        let access_token = self.tokens.issue_access(
            user.id,
            user.organization_id,
            user.role,
            &permissions,
            self.access_ttl(),
        )?;

        let next_refresh = if self.jwt.rotate_refresh_tokens {
            let remaining = Duration::seconds(claims.exp - now.timestamp());
            Some(self.tokens.issue_refresh(
                user.id,
                user.organization_id,
                session.id,
                remaining,
            )?)
        } else {
            None
        };

        let next_refresh_hash = next_refresh.as_deref().map(hash_token);
        let rotated = self
            .stores
            .sessions
            .rotate_session_tokens(
                session.id,
                &presented_hash,
                &hash_token(&access_token),
                next_refresh_hash.as_deref(),
                now,
            )
            .await?;
        if !rotated {
            return Err(unauthenticated());
        }

        tracing::info!(user_id = %user.id, session_id = %session.id, "Access token refreshed");

        Ok(TokenPair {
            access_token,
            refresh_token: next_refresh.unwrap_or_else(|| refresh_token.to_string()),
            token_type: "bearer".to_string(),
            expires_in: self.jwt.access_token_expiry,
        })
    }

    /// Revoke every session of the caller. Revoking nothing is not an error.
    pub async fn logout(
        &self,
        identity: &Identity,
        meta: &RequestMetadata,
    ) -> Result<u64, AppError> {
        let revoked = self
            .stores
            .sessions
            .revoke_user_sessions(identity.user_id(), Utc::now())
            .await?;

        self.audit(
            NewAuditLogEntry::user_action(
                identity.user_id(),
                identity.organization_id(),
                "user_logout",
            )
            .with_client(meta.ip_address.clone(), meta.user_agent.clone()),
        )
        .await;

        tracing::info!(user_id = %identity.user_id(), revoked, "User logged out");
        Ok(revoked)
    }

    /// Resolve a bearer token to a live identity.
    ///
    /// Token, session and account failures all collapse to
    /// `AuthError::Unauthenticated`; store failures propagate unchanged.
    pub async fn resolve_identity(&self, bearer: &str) -> Result<Identity, AppError> {
        let unauthenticated = || AppError::Auth(AuthError::Unauthenticated);
        let now = Utc::now();

        let claims = self
            .tokens
            .verify_access(bearer)
            .map_err(|_| unauthenticated())?;

        let session = self
            .stores
            .sessions
            .find_active_session_by_token_hash(&hash_token(bearer))
            .await?
            .filter(|s| s.is_usable(now) && s.user_id == claims.sub)
            .ok_or_else(unauthenticated)?;

        let mut user = self
            .stores
            .users
            .find_user_by_id(claims.sub)
            .await?
            .filter(User::is_active)
            .ok_or_else(unauthenticated)?;

        self.stores.users.touch_user_activity(user.id, now).await?;
        user.last_activity_at = now;

        Ok(Identity {
            user,
            claims,
            session_id: session.id,
        })
    }

    /// Replace the caller's password and revoke all of their sessions.
    pub async fn change_password(
        &self,
        identity: &Identity,
        request: ChangePasswordRequest,
        meta: &RequestMetadata,
    ) -> Result<(), AppError> {
        if !self
            .hasher
            .verify(&request.current_password, &identity.user.password_hash)
        {
            tracing::warn!(
                user_id = %identity.user_id(),
                "Password change with wrong current password"
            );
            return Err(
                ValidationError::Invalid("Current password is incorrect".to_string()).into(),
            );
        }
        validate_password_strength(&request.new_password)?;
        passwords_match(&request.new_password, &request.confirm_password)?;

        let now = Utc::now();
        let password_hash = self.hasher.hash(&request.new_password)?;
        self.stores
            .users
            .update_password_hash(identity.user_id(), &password_hash, now)
            .await?;
        let revoked = self
            .stores
            .sessions
            .revoke_user_sessions(identity.user_id(), now)
            .await?;

        self.audit(
            NewAuditLogEntry::user_action(
                identity.user_id(),
                identity.organization_id(),
                "password_change",
            )
            .with_client(meta.ip_address.clone(), meta.user_agent.clone()),
        )
        .await;

        tracing::info!(user_id = %identity.user_id(), revoked, "Password changed");
        Ok(())
    }

    /// Apply a self-service profile edit.
    pub async fn update_profile(
        &self,
        identity: &Identity,
        update: ProfileUpdate,
        meta: &RequestMetadata,
    ) -> Result<UserProfile, AppError> {
        let update = update.validated()?;
        if update.is_empty() {
            return Err(ValidationError::Invalid("No fields to update".to_string()).into());
        }

        let old_values = update.previous_values(&identity.user);
        let new_values = serde_json::to_value(&update)
            .map_err(|e| AppError::Internal(format!("Failed to encode profile update: {}", e)))?;

        let user = self
            .stores
            .users
            .update_profile(identity.user_id(), &update, Utc::now())
            .await?
            .ok_or_else(|| AppError::Auth(AuthError::Unauthenticated))?;

        self.audit(
            NewAuditLogEntry::user_action(user.id, user.organization_id, "user_profile_update")
                .with_values(Some(old_values), Some(new_values))
                .with_client(meta.ip_address.clone(), meta.user_agent.clone()),
        )
        .await;

        tracing::info!(user_id = %user.id, "Profile updated");
        Ok(user.profile())
    }

    /// Users of the caller's organization. Hospital admins and above.
    pub async fn list_organization_users(
        &self,
        identity: &Identity,
        offset: i64,
        limit: i64,
    ) -> Result<UserPage, AppError> {
        identity.require_role(Role::HospitalAdmin)?;
        check_page(offset, limit)?;

        let (users, total) = self
            .stores
            .users
            .list_users(identity.organization_id(), offset, limit)
            .await?;

        Ok(UserPage {
            users: users.iter().map(User::profile).collect(),
            total,
            offset,
            limit,
        })
    }

    /// Audit trail of the caller's organization.
    pub async fn list_audit_logs(
        &self,
        identity: &Identity,
        filter: AuditLogFilter,
    ) -> Result<AuditPage, AppError> {
        identity.require_permission("audit_logs.read")?;
        check_page(filter.offset, filter.limit)?;

        let (entries, total) = self
            .stores
            .audit
            .list_entries(identity.organization_id(), &filter)
            .await?;

        Ok(AuditPage {
            entries,
            total,
            offset: filter.offset,
            limit: filter.limit,
        })
    }

    /// Audit failures are logged, never surfaced to the caller.
    async fn audit(&self, entry: NewAuditLogEntry) {
        let action = entry.action.clone();
        if let Err(e) = self.stores.audit.append(entry).await {
            tracing::error!(action = %action, error = %e, "Failed to write audit entry");
        }
    }
}

fn duplicate_email() -> AppError {
    AppError::Conflict("Email address already registered".to_string())
}

fn check_page(offset: i64, limit: i64) -> Result<(), ValidationError> {
    if offset < 0 {
        return Err(ValidationError::Invalid("offset must not be negative".to_string()));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(ValidationError::Invalid(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::models::{Session, SessionStatus, UserStatus};
    use crate::store::{InMemoryStore, SessionStore, UserStore};
    use std::sync::Arc;

    struct Harness {
        store: Arc<InMemoryStore>,
        service: AuthService,
        org: Organization,
    }

    fn jwt_settings(rotate: bool) -> JwtSettings {
        JwtSettings {
            secret: "unit-test-secret-key-that-is-long-enough".to_string(),
            issuer: "medinventory".to_string(),
            access_token_expiry: 1800,
            refresh_token_expiry: 86400,
            remember_me_refresh_token_expiry: 604800,
            rotate_refresh_tokens: rotate,
        }
    }

    fn harness_with(rotate: bool, auto_activate: bool) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let org = Organization::new("General Hospital");
        store.insert_organization(org.clone());
        store.grant_permissions(Role::StaffUser, &["inventory.read"]);

        let jwt = jwt_settings(rotate);
        let service = AuthService::new(
            CredentialHasher::with_params(1024, 1, 1).unwrap(),
            TokenCodec::from_settings(&jwt),
            AuthStores::shared(store.clone()),
            jwt,
            SignupSettings {
                default_organization_id: Some(org.id),
                auto_activate,
            },
        );
        Harness { store, service, org }
    }

    fn harness() -> Harness {
        harness_with(false, true)
    }

    fn signup_request(email: &str) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            password: "abc123".to_string(),
            confirm_password: "abc123".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Byron".to_string(),
            organization_id: None,
        }
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            remember_me: false,
        }
    }

    fn meta() -> RequestMetadata {
        RequestMetadata {
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("unit-test".to_string()),
        }
    }

    #[tokio::test]
    async fn signup_activates_and_opens_session() {
        let h = harness();
        let response = h
            .service
            .signup(signup_request("A@X.com"), &meta())
            .await
            .unwrap();

        assert_eq!(response.user.email, "a@x.com");
        assert_eq!(response.user.status, UserStatus::Active);
        assert_eq!(response.organization.id, h.org.id);
        assert_eq!(response.permissions, vec!["inventory.read".to_string()]);

        let tokens = response.tokens.unwrap();
        let identity = h
            .service
            .resolve_identity(&tokens.access_token)
            .await
            .unwrap();
        assert_eq!(identity.user.email, "a@x.com");

        let sessions = h.store.sessions_for_user(response.user.id);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].ip_address.as_deref(), Some("10.0.0.1"));
        assert!(sessions[0].expires_at > Utc::now() + Duration::hours(23));
        assert!(h.store.audit_entries().iter().any(|e| e.action == "user_signup"));
    }

    struct UnavailableSessions;

    #[async_trait::async_trait]
    impl SessionStore for UnavailableSessions {
        async fn create_session(&self, _: NewSession) -> Result<Session, AppError> {
            Err(DatabaseError::Timeout.into())
        }

        async fn find_active_session_by_token_hash(
            &self,
            _: &str,
        ) -> Result<Option<Session>, AppError> {
            Err(DatabaseError::Timeout.into())
        }

        async fn find_active_session_by_refresh_hash(
            &self,
            _: &str,
        ) -> Result<Option<Session>, AppError> {
            Err(DatabaseError::Timeout.into())
        }

        async fn rotate_session_tokens(
            &self,
            _: Uuid,
            _: &str,
            _: &str,
            _: Option<&str>,
            _: DateTime<Utc>,
        ) -> Result<bool, AppError> {
            Err(DatabaseError::Timeout.into())
        }

        async fn revoke_user_sessions(&self, _: Uuid, _: DateTime<Utc>) -> Result<u64, AppError> {
            Err(DatabaseError::Timeout.into())
        }

        async fn expire_sessions(&self, _: DateTime<Utc>) -> Result<u64, AppError> {
            Err(DatabaseError::Timeout.into())
        }
    }

    #[tokio::test]
    async fn signup_is_audited_even_if_the_session_cannot_be_opened() {
        let h = harness();
        let mut stores = AuthStores::shared(h.store.clone());
        stores.sessions = Arc::new(UnavailableSessions);
        let jwt = jwt_settings(false);
        let service = AuthService::new(
            CredentialHasher::with_params(1024, 1, 1).unwrap(),
            TokenCodec::from_settings(&jwt),
            stores,
            jwt,
            SignupSettings {
                default_organization_id: Some(h.org.id),
                auto_activate: true,
            },
        );

        let err = service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(DatabaseError::Timeout)));

        let user = h.store.find_user_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(user.status, UserStatus::Active);
        assert!(h
            .store
            .audit_entries()
            .iter()
            .any(|e| e.action == "user_signup" && e.user_id == Some(user.id)));

        let response = h
            .service
            .login(login_request("a@x.com", "abc123"), &meta())
            .await
            .unwrap();
        assert!(response.tokens.is_some());
    }

    #[tokio::test]
    async fn signup_without_auto_activation_returns_no_tokens() {
        let h = harness_with(false, false);
        let response = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap();

        assert!(response.tokens.is_none());
        assert_eq!(response.user.status, UserStatus::Pending);

        let err = h
            .service
            .login(login_request("a@x.com", "abc123"), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::AccountInactive)));
    }

    #[tokio::test]
    async fn signup_rejects_duplicates_and_bad_tenants() {
        let h = harness();
        h.service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap();

        let err = h
            .service
            .signup(signup_request(" a@X.COM "), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let mut request = signup_request("b@x.com");
        request.organization_id = Some(Uuid::new_v4());
        let err = h.service.signup(request, &meta()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut request = signup_request("c@x.com");
        request.confirm_password = "abc124".to_string();
        let err = h.service.signup(request, &meta()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ValidationError::Mismatch(_))));
    }

    #[tokio::test]
    async fn signup_requires_a_tenant_when_no_default_is_configured() {
        let store = Arc::new(InMemoryStore::new());
        let jwt = jwt_settings(false);
        let service = AuthService::new(
            CredentialHasher::with_params(1024, 1, 1).unwrap(),
            TokenCodec::from_settings(&jwt),
            AuthStores::shared(store),
            jwt,
            SignupSettings::default(),
        );

        let err = service.signup(signup_request("a@x.com"), &meta()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ValidationError::EmptyField(_))));
    }

    #[tokio::test]
    async fn third_failure_locks_even_the_right_password_out() {
        let h = harness();
        h.service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap();

        for _ in 0..3 {
            let err = h
                .service
                .login(login_request("a@x.com", "wrong1"), &meta())
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Auth(AuthError::InvalidCredentials)));
        }

        let err = h
            .service
            .login(login_request("a@x.com", "abc123"), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::AccountLocked)));

        let user = h.store.find_user_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(user.failed_login_attempts, 3);
        assert!(user.locked_until.unwrap() >= Utc::now() + Duration::minutes(14));
    }

    async fn expire_lock(store: &InMemoryStore, user_id: Uuid) {
        store
            .lock_user(user_id, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lockout_escalates_across_expired_locks() {
        let h = harness();
        let user_id = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap()
            .user
            .id;

        for _ in 0..3 {
            h.service
                .login(login_request("a@x.com", "nope12"), &meta())
                .await
                .unwrap_err();
        }
        expire_lock(&h.store, user_id).await;

        h.service
            .login(login_request("a@x.com", "nope12"), &meta())
            .await
            .unwrap_err();
        let user = h.store.find_user_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.failed_login_attempts, 4);
        assert!(user.locked_until.unwrap() < Utc::now() + Duration::minutes(16));
        expire_lock(&h.store, user_id).await;

        let err = h
            .service
            .login(login_request("a@x.com", "nope12"), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::InvalidCredentials)));

        let user = h.store.find_user_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.failed_login_attempts, 5);
        let until = user.locked_until.unwrap();
        assert!(until >= Utc::now() + Duration::minutes(59));
        assert!(until <= Utc::now() + Duration::hours(1));

        let err = h
            .service
            .login(login_request("a@x.com", "abc123"), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::AccountLocked)));
    }

    #[tokio::test]
    async fn unknown_email_is_indistinguishable_from_wrong_password() {
        let h = harness();
        let err = h
            .service
            .login(login_request("nobody@x.com", "abc123"), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn successful_login_resets_failures() {
        let h = harness();
        h.service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap();
        h.service
            .login(login_request("a@x.com", "nope12"), &meta())
            .await
            .unwrap_err();

        let response = h
            .service
            .login(login_request("a@x.com", "abc123"), &meta())
            .await
            .unwrap();
        assert!(response.tokens.is_some());

        let user = h.store.find_user_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(user.failed_login_attempts, 0);
        assert!(user.last_login_at.is_some());
    }

    #[tokio::test]
    async fn legacy_bcrypt_digest_is_upgraded_on_login() {
        let h = harness();
        let response = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap();
        let legacy = bcrypt::hash("abc123", 4).unwrap();
        h.store
            .upgrade_password_hash(response.user.id, &legacy)
            .await
            .unwrap();

        h.service
            .login(login_request("a@x.com", "abc123"), &meta())
            .await
            .unwrap();

        let user = h
            .store
            .find_user_by_id(response.user.id)
            .await
            .unwrap()
            .unwrap();
        assert!(user.password_hash.starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn refresh_echoes_refresh_token_and_retires_old_access_token() {
        let h = harness();
        let tokens = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap()
            .tokens
            .unwrap();

        let refreshed = h.service.refresh(&tokens.refresh_token).await.unwrap();
        assert_ne!(refreshed.access_token, tokens.access_token);
        assert_eq!(refreshed.refresh_token, tokens.refresh_token);

        assert!(h.service.resolve_identity(&refreshed.access_token).await.is_ok());
        assert!(h.service.resolve_identity(&tokens.access_token).await.is_err());

        // The unrotated refresh token keeps working.
        assert!(h.service.refresh(&tokens.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn rotation_retires_the_presented_refresh_token() {
        let h = harness_with(true, true);
        let tokens = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap()
            .tokens
            .unwrap();

        let refreshed = h.service.refresh(&tokens.refresh_token).await.unwrap();
        assert_ne!(refreshed.refresh_token, tokens.refresh_token);

        let err = h.service.refresh(&tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::Unauthenticated)));
        assert!(h.service.refresh(&refreshed.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn session_past_expiry_is_absent_before_the_sweep() {
        let h = harness();
        let response = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap();
        let tokens = response.tokens.unwrap();
        let session_id = h.store.sessions_for_user(response.user.id)[0].id;

        h.store
            .set_session_expiry(session_id, Utc::now() - Duration::seconds(1));
        assert_eq!(
            h.store.sessions_for_user(response.user.id)[0].status,
            SessionStatus::Active
        );

        let err = h
            .service
            .resolve_identity(&tokens.access_token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::Unauthenticated)));
        let err = h.service.refresh(&tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::Unauthenticated)));
    }

    #[tokio::test]
    async fn access_token_cannot_be_used_to_refresh() {
        let h = harness();
        let tokens = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap()
            .tokens
            .unwrap();

        assert!(h.service.refresh(&tokens.access_token).await.is_err());
        assert!(h.service.resolve_identity(&tokens.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn logout_revokes_every_session() {
        let h = harness();
        let first = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap()
            .tokens
            .unwrap();
        let second = h
            .service
            .login(login_request("a@x.com", "abc123"), &meta())
            .await
            .unwrap()
            .tokens
            .unwrap();

        let identity = h
            .service
            .resolve_identity(&first.access_token)
            .await
            .unwrap();
        assert_eq!(h.service.logout(&identity, &meta()).await.unwrap(), 2);
        assert_eq!(h.service.logout(&identity, &meta()).await.unwrap(), 0);

        assert!(h.service.resolve_identity(&first.access_token).await.is_err());
        assert!(h.service.resolve_identity(&second.access_token).await.is_err());
        assert!(h.service.refresh(&second.refresh_token).await.is_err());
        assert!(h
            .store
            .sessions_for_user(identity.user_id())
            .iter()
            .all(|s| s.status == SessionStatus::Revoked));
    }

    #[tokio::test]
    async fn suspended_user_cannot_resolve_identity() {
        let h = harness();
        let response = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap();
        let tokens = response.tokens.unwrap();

        h.store
            .set_user_status(response.user.id, UserStatus::Suspended);

        assert!(h.service.resolve_identity(&tokens.access_token).await.is_err());
        assert!(h.service.refresh(&tokens.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn change_password_revokes_other_sessions() {
        let h = harness();
        let a = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap()
            .tokens
            .unwrap();
        let b = h
            .service
            .login(login_request("a@x.com", "abc123"), &meta())
            .await
            .unwrap()
            .tokens
            .unwrap();

        let identity = h.service.resolve_identity(&a.access_token).await.unwrap();
        h.service
            .change_password(
                &identity,
                ChangePasswordRequest {
                    current_password: "abc123".to_string(),
                    new_password: "xyz789".to_string(),
                    confirm_password: "xyz789".to_string(),
                },
                &meta(),
            )
            .await
            .unwrap();

        assert!(h.service.resolve_identity(&b.access_token).await.is_err());
        assert!(h
            .service
            .login(login_request("a@x.com", "abc123"), &meta())
            .await
            .is_err());
        assert!(h
            .service
            .login(login_request("a@x.com", "xyz789"), &meta())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn change_password_requires_current_password() {
        let h = harness();
        let tokens = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap()
            .tokens
            .unwrap();
        let identity = h
            .service
            .resolve_identity(&tokens.access_token)
            .await
            .unwrap();

        let err = h
            .service
            .change_password(
                &identity,
                ChangePasswordRequest {
                    current_password: "wrong1".to_string(),
                    new_password: "xyz789".to_string(),
                    confirm_password: "xyz789".to_string(),
                },
                &meta(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(h.service.resolve_identity(&tokens.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn profile_update_is_audited_with_old_values() {
        let h = harness();
        let tokens = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap()
            .tokens
            .unwrap();
        let identity = h
            .service
            .resolve_identity(&tokens.access_token)
            .await
            .unwrap();

        let profile = h
            .service
            .update_profile(
                &identity,
                ProfileUpdate {
                    first_name: Some("Augusta".to_string()),
                    ..Default::default()
                },
                &meta(),
            )
            .await
            .unwrap();
        assert_eq!(profile.first_name, "Augusta");

        let entry = h
            .store
            .audit_entries()
            .into_iter()
            .find(|e| e.action == "user_profile_update")
            .unwrap();
        assert_eq!(entry.old_values, Some(serde_json::json!({ "first_name": "Ada" })));
        assert_eq!(entry.new_values, Some(serde_json::json!({ "first_name": "Augusta" })));

        let err = h
            .service
            .update_profile(&identity, ProfileUpdate::default(), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn listing_users_needs_hospital_admin() {
        let h = harness();
        let response = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap();
        let tokens = response.tokens.unwrap();
        let identity = h
            .service
            .resolve_identity(&tokens.access_token)
            .await
            .unwrap();

        let err = h
            .service
            .list_organization_users(&identity, 0, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        h.store.set_user_role(response.user.id, Role::HospitalAdmin);
        let identity = h
            .service
            .resolve_identity(&tokens.access_token)
            .await
            .unwrap();
        let page = h
            .service
            .list_organization_users(&identity, 0, 10)
            .await
            .unwrap();
        assert_eq!(page.total, 1);

        let err = h
            .service
            .list_organization_users(&identity, 0, 101)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn audit_logs_need_the_permission_in_the_token() {
        let h = harness();
        let tokens = h
            .service
            .signup(signup_request("a@x.com"), &meta())
            .await
            .unwrap()
            .tokens
            .unwrap();
        let identity = h
            .service
            .resolve_identity(&tokens.access_token)
            .await
            .unwrap();

        let err = h
            .service
            .list_audit_logs(&identity, AuditLogFilter { limit: 10, ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        h.store
            .grant_permissions(Role::StaffUser, &["audit_logs.read"]);
        let tokens = h
            .service
            .login(login_request("a@x.com", "abc123"), &meta())
            .await
            .unwrap()
            .tokens
            .unwrap();
        let identity = h
            .service
            .resolve_identity(&tokens.access_token)
            .await
            .unwrap();

        let page = h
            .service
            .list_audit_logs(&identity, AuditLogFilter { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.entries[0].action, "user_login");
    }
}
