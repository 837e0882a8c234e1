use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::convert::TryFrom;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use super::{AuditLog, SessionStore, TenantStore, UserStore};
use crate::auth::Role;
use crate::error::{AppError, DatabaseError};
use crate::models::{
    AuditLogEntry, AuditLogFilter, NewAuditLogEntry, NewSession, NewUser, Organization,
    ProfileUpdate, Session, SessionStatus, User, UserStatus,
};

const USER_COLUMNS: &str = "id, organization_id, email, password_hash, first_name, last_name, \
    phone, department, job_title, role, status, failed_login_attempts, locked_until, \
    last_login_at, last_activity_at, email_verified_at, password_changed_at, preferences, \
    timezone, language, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, token_hash, refresh_token_hash, status, ip_address, \
    user_agent, expires_at, last_activity_at, created_at";

/// Postgres-backed store. Every statement runs under `query_timeout`.
#[derive(Clone)]
pub struct PgAuthStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgAuthStore {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    async fn bounded<T, F>(&self, query: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => {
                tracing::error!(
                    timeout_ms = self.query_timeout.as_millis() as u64,
                    "Query timed out"
                );
                Err(DatabaseError::Timeout.into())
            }
        }
    }
}

// ==================== Row mapping ====================

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    organization_id: Uuid,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    phone: Option<String>,
    department: Option<String>,
    job_title: Option<String>,
    role: String,
    status: String,
    failed_login_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    last_activity_at: DateTime<Utc>,
    email_verified_at: Option<DateTime<Utc>>,
    password_changed_at: DateTime<Utc>,
    preferences: serde_json::Value,
    timezone: String,
    language: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let status: UserStatus = row
            .status
            .parse()
            .map_err(|e: String| DatabaseError::CorruptRecord(format!("users.{}: {}", row.id, e)))?;
        let role = Role::parse(&row.role);
        if role == Role::Unknown {
            tracing::warn!(user_id = %row.id, role = %row.role, "Stored role is not recognized");
        }

        Ok(User {
            id: row.id,
            organization_id: row.organization_id,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            department: row.department,
            job_title: row.job_title,
            role,
            status,
            failed_login_attempts: row.failed_login_attempts,
            locked_until: row.locked_until,
            last_login_at: row.last_login_at,
            last_activity_at: row.last_activity_at,
            email_verified_at: row.email_verified_at,
            password_changed_at: row.password_changed_at,
            preferences: row.preferences,
            timezone: row.timezone,
            language: row.language,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    token_hash: String,
    refresh_token_hash: String,
    status: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    expires_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = AppError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status: SessionStatus = row.status.parse().map_err(|e: String| {
            DatabaseError::CorruptRecord(format!("user_sessions.{}: {}", row.id, e))
        })?;

        Ok(Session {
            id: row.id,
            user_id: row.user_id,
            token_hash: row.token_hash,
            refresh_token_hash: row.refresh_token_hash,
            status,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            expires_at: row.expires_at,
            last_activity_at: row.last_activity_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    #[sqlx(rename = "type")]
    org_type: String,
    subscription_plan: String,
    subscription_status: String,
    settings: serde_json::Value,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: row.id,
            name: row.name,
            org_type: row.org_type,
            subscription_plan: row.subscription_plan,
            subscription_status: row.subscription_status,
            settings: row.settings,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct AuditRow {
    id: Uuid,
    user_id: Option<Uuid>,
    organization_id: Uuid,
    action: String,
    resource_type: Option<String>,
    resource_id: Option<String>,
    old_values: Option<serde_json::Value>,
    new_values: Option<serde_json::Value>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditLogEntry {
    fn from(row: AuditRow) -> Self {
        AuditLogEntry {
            id: row.id,
            user_id: row.user_id,
            organization_id: row.organization_id,
            action: row.action,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            old_values: row.old_values,
            new_values: row.new_values,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: row.created_at,
        }
    }
}

fn user_from_row(row: Option<UserRow>) -> Result<Option<User>, AppError> {
    row.map(User::try_from).transpose()
}

// ==================== Users ====================

#[async_trait]
impl UserStore for PgAuthStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let row = self
            .bounded(
                sqlx::query_as::<_, UserRow>(&sql)
                    .bind(email)
                    .fetch_optional(&self.pool),
            )
            .await?;
        user_from_row(row)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = self
            .bounded(
                sqlx::query_as::<_, UserRow>(&sql)
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        user_from_row(row)
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, AppError> {
        let user = new_user.into_user(Utc::now());
        self.bounded(
            sqlx::query(
                r#"
                INSERT INTO users (
                    id, organization_id, email, password_hash, first_name, last_name,
                    role, status, failed_login_attempts, last_activity_at,
                    password_changed_at, preferences, timezone, language, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                "#,
            )
            .bind(user.id)
            .bind(user.organization_id)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.role.as_str())
            .bind(user.status.as_str())
            .bind(user.failed_login_attempts)
            .bind(user.last_activity_at)
            .bind(user.password_changed_at)
            .bind(&user.preferences)
            .bind(&user.timezone)
            .bind(&user.language)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(user)
    }

    async fn activate_user(&self, id: Uuid, at: DateTime<Utc>) -> Result<Option<User>, AppError> {
        let sql = format!(
            "UPDATE users SET status = 'active', email_verified_at = $2, updated_at = $2 \
             WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        );
        let row = self
            .bounded(
                sqlx::query_as::<_, UserRow>(&sql)
                    .bind(id)
                    .bind(at)
                    .fetch_optional(&self.pool),
            )
            .await?;
        user_from_row(row)
    }

    async fn record_failed_login(&self, id: Uuid) -> Result<i32, AppError> {
        self.bounded(
            sqlx::query_scalar::<_, i32>(
                r#"
                UPDATE users
                SET failed_login_attempts = failed_login_attempts + 1
                WHERE id = $1
                RETURNING failed_login_attempts
                "#,
            )
            .bind(id)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn lock_user(&self, id: Uuid, until: DateTime<Utc>) -> Result<(), AppError> {
        self.bounded(
            sqlx::query("UPDATE users SET locked_until = $2 WHERE id = $1")
                .bind(id)
                .bind(until)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn record_successful_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        self.bounded(
            sqlx::query(
                r#"
                UPDATE users
                SET failed_login_attempts = 0,
                    locked_until = NULL,
                    last_login_at = $2,
                    last_activity_at = $2,
                    updated_at = $2
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn touch_user_activity(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        self.bounded(
            sqlx::query("UPDATE users SET last_activity_at = $2 WHERE id = $1")
                .bind(id)
                .bind(at)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: &ProfileUpdate,
        at: DateTime<Utc>,
    ) -> Result<Option<User>, AppError> {
        let sql = format!(
            r#"
            UPDATE users
            SET first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                phone = COALESCE($4, phone),
                department = COALESCE($5, department),
                job_title = COALESCE($6, job_title),
                timezone = COALESCE($7, timezone),
                language = COALESCE($8, language),
                preferences = COALESCE($9, preferences),
                updated_at = $10
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let row = self
            .bounded(
                sqlx::query_as::<_, UserRow>(&sql)
                    .bind(id)
                    .bind(update.first_name.as_deref())
                    .bind(update.last_name.as_deref())
                    .bind(update.phone.as_deref())
                    .bind(update.department.as_deref())
                    .bind(update.job_title.as_deref())
                    .bind(update.timezone.as_deref())
                    .bind(update.language.as_deref())
                    .bind(update.preferences.as_ref())
                    .bind(at)
                    .fetch_optional(&self.pool),
            )
            .await?;
        user_from_row(row)
    }

    async fn update_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.bounded(
            sqlx::query(
                r#"
                UPDATE users
                SET password_hash = $2, password_changed_at = $3, updated_at = $3
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(password_hash)
            .bind(at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn upgrade_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), AppError> {
        self.bounded(
            sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
                .bind(id)
                .bind(password_hash)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn list_users(
        &self,
        organization_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<User>, i64), AppError> {
        let sql = format!(
            "SELECT {} FROM users WHERE organization_id = $1 \
             ORDER BY created_at, email OFFSET $2 LIMIT $3",
            USER_COLUMNS
        );
        let rows = self
            .bounded(
                sqlx::query_as::<_, UserRow>(&sql)
                    .bind(organization_id)
                    .bind(offset)
                    .bind(limit)
                    .fetch_all(&self.pool),
            )
            .await?;
        let total = self
            .bounded(
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM users WHERE organization_id = $1",
                )
                .bind(organization_id)
                .fetch_one(&self.pool),
            )
            .await?;

        let users = rows
            .into_iter()
            .map(User::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((users, total))
    }
}

// ==================== Tenants ====================

#[async_trait]
impl TenantStore for PgAuthStore {
    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, AppError> {
        let row = self
            .bounded(
                sqlx::query_as::<_, OrganizationRow>(
                    r#"
                    SELECT id, name, type, subscription_plan, subscription_status,
                           settings, is_active, created_at, updated_at
                    FROM organizations
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(Organization::from))
    }

    async fn permissions_for_role(&self, role: Role) -> Result<Vec<String>, AppError> {
        self.bounded(
            sqlx::query_scalar::<_, String>(
                r#"
                SELECT p.name
                FROM role_permissions rp
                JOIN permissions p ON p.id = rp.permission_id
                WHERE rp.role = $1
                ORDER BY p.name
                "#,
            )
            .bind(role.as_str())
            .fetch_all(&self.pool),
        )
        .await
    }
}

// ==================== Sessions ====================

#[async_trait]
impl SessionStore for PgAuthStore {
    async fn create_session(&self, new_session: NewSession) -> Result<Session, AppError> {
        let session = new_session.into_session(Utc::now());
        self.bounded(
            sqlx::query(
                r#"
                INSERT INTO user_sessions (
                    id, user_id, token_hash, refresh_token_hash, status,
                    ip_address, user_agent, expires_at, last_activity_at, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(session.id)
            .bind(session.user_id)
            .bind(&session.token_hash)
            .bind(&session.refresh_token_hash)
            .bind(session.status.as_str())
            .bind(session.ip_address.as_deref())
            .bind(session.user_agent.as_deref())
            .bind(session.expires_at)
            .bind(session.last_activity_at)
            .bind(session.created_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(session)
    }

    async fn find_active_session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Session>, AppError> {
        let sql = format!(
            "SELECT {} FROM user_sessions WHERE token_hash = $1 AND status = 'active'",
            SESSION_COLUMNS
        );
        let row = self
            .bounded(
                sqlx::query_as::<_, SessionRow>(&sql)
                    .bind(token_hash)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.map(Session::try_from).transpose()
    }

    async fn find_active_session_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<Session>, AppError> {
        let sql = format!(
            "SELECT {} FROM user_sessions WHERE refresh_token_hash = $1 AND status = 'active'",
            SESSION_COLUMNS
        );
        let row = self
            .bounded(
                sqlx::query_as::<_, SessionRow>(&sql)
                    .bind(refresh_token_hash)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.map(Session::try_from).transpose()
    }

    async fn rotate_session_tokens(
        &self,
        session_id: Uuid,
        presented_refresh_hash: &str,
        token_hash: &str,
        refresh_token_hash: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = self
            .bounded(
                sqlx::query(
                    r#"
                    UPDATE user_sessions
                    SET token_hash = $3,
                        refresh_token_hash = COALESCE($4, refresh_token_hash),
                        last_activity_at = $5
                    WHERE id = $1 AND status = 'active' AND refresh_token_hash = $2
                    "#,
                )
                .bind(session_id)
                .bind(presented_refresh_hash)
                .bind(token_hash)
                .bind(refresh_token_hash)
                .bind(at)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = self
            .bounded(
                sqlx::query(
                    r#"
                    UPDATE user_sessions
                    SET status = 'revoked', last_activity_at = $2
                    WHERE user_id = $1 AND status = 'active'
                    "#,
                )
                .bind(user_id)
                .bind(at)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = self
            .bounded(
                sqlx::query(
                    "UPDATE user_sessions SET status = 'expired' \
                     WHERE status = 'active' AND expires_at < $1",
                )
                .bind(now)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }
}

// ==================== Audit log ====================

#[async_trait]
impl AuditLog for PgAuthStore {
    async fn append(&self, entry: NewAuditLogEntry) -> Result<(), AppError> {
        let entry = entry.into_entry(Utc::now());
        self.bounded(
            sqlx::query(
                r#"
                INSERT INTO user_audit_log (
                    id, user_id, organization_id, action, resource_type, resource_id,
                    old_values, new_values, ip_address, user_agent, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(entry.id)
            .bind(entry.user_id)
            .bind(entry.organization_id)
            .bind(&entry.action)
            .bind(entry.resource_type.as_deref())
            .bind(entry.resource_id.as_deref())
            .bind(entry.old_values.as_ref())
            .bind(entry.new_values.as_ref())
            .bind(entry.ip_address.as_deref())
            .bind(entry.user_agent.as_deref())
            .bind(entry.created_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn list_entries(
        &self,
        organization_id: Uuid,
        filter: &AuditLogFilter,
    ) -> Result<(Vec<AuditLogEntry>, i64), AppError> {
        const FILTER: &str = "organization_id = $1 \
            AND ($2::uuid IS NULL OR user_id = $2) \
            AND ($3::text IS NULL OR action = $3) \
            AND ($4::text IS NULL OR resource_type = $4)";

        let sql = format!(
            "SELECT id, user_id, organization_id, action, resource_type, resource_id, \
             old_values, new_values, ip_address, user_agent, created_at \
             FROM user_audit_log WHERE {} ORDER BY created_at DESC OFFSET $5 LIMIT $6",
            FILTER
        );
        let rows = self
            .bounded(
                sqlx::query_as::<_, AuditRow>(&sql)
                    .bind(organization_id)
                    .bind(filter.user_id)
                    .bind(filter.action.as_deref())
                    .bind(filter.resource_type.as_deref())
                    .bind(filter.offset)
                    .bind(filter.limit)
                    .fetch_all(&self.pool),
            )
            .await?;

        let count_sql = format!("SELECT COUNT(*) FROM user_audit_log WHERE {}", FILTER);
        let total = self
            .bounded(
                sqlx::query_scalar::<_, i64>(&count_sql)
                    .bind(organization_id)
                    .bind(filter.user_id)
                    .bind(filter.action.as_deref())
                    .bind(filter.resource_type.as_deref())
                    .fetch_one(&self.pool),
            )
            .await?;

        Ok((rows.into_iter().map(AuditLogEntry::from).collect(), total))
    }
}
