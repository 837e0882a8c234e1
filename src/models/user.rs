use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::auth::Role;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
    Pending,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Suspended => "suspended",
            UserStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            "suspended" => Ok(UserStatus::Suspended),
            "pending" => Ok(UserStatus::Pending),
            other => Err(format!("unknown user status '{}'", other)),
        }
    }
}

/// Full account record, including credential and lockout state.
/// Never serialized directly; responses use [`UserProfile`].
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub password_changed_at: DateTime<Utc>,
    pub preferences: serde_json::Value,
    pub timezone: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            organization_id: self.organization_id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            department: self.department.clone(),
            job_title: self.job_title.clone(),
            role: self.role,
            status: self.status,
            email_verified_at: self.email_verified_at,
            last_login_at: self.last_login_at,
            preferences: self.preferences.clone(),
            timezone: self.timezone.clone(),
            language: self.language.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_activity_at: self.last_activity_at,
        }
    }
}

/// Client-facing view of a user
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserProfile {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub preferences: serde_json::Value,
    pub timezone: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Insert payload for a new account; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub organization_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl NewUser {
    /// Materialize the record a store persists for this payload.
    pub fn into_user(self, now: DateTime<Utc>) -> User {
        User {
            id: Uuid::new_v4(),
            organization_id: self.organization_id,
            email: self.email,
            password_hash: self.password_hash,
            first_name: self.first_name,
            last_name: self.last_name,
            phone: None,
            department: None,
            job_title: None,
            role: self.role,
            status: UserStatus::Pending,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            last_activity_at: now,
            email_verified_at: None,
            password_changed_at: now,
            preferences: serde_json::json!({}),
            timezone: "Asia/Kolkata".to_string(),
            language: "en".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Self-service profile edit. Role and status are deliberately absent;
/// unknown fields are rejected rather than ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<serde_json::Value>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ProfileUpdate::default()
    }

    /// Trim and bound every supplied field.
    pub fn validated(self) -> Result<Self, ValidationError> {
        use crate::validators::{is_valid_name, is_valid_profile_field};

        let optional = |field: &str, value: Option<String>| {
            value
                .map(|v| is_valid_profile_field(field, &v))
                .transpose()
        };

        if let Some(preferences) = &self.preferences {
            if !preferences.is_object() {
                return Err(ValidationError::InvalidFormat("preferences".to_string()));
            }
        }

        Ok(Self {
            first_name: self
                .first_name
                .map(|v| is_valid_name("first_name", &v))
                .transpose()?,
            last_name: self
                .last_name
                .map(|v| is_valid_name("last_name", &v))
                .transpose()?,
            phone: optional("phone", self.phone)?,
            department: optional("department", self.department)?,
            job_title: optional("job_title", self.job_title)?,
            timezone: optional("timezone", self.timezone)?,
            language: optional("language", self.language)?,
            preferences: self.preferences,
        })
    }

    pub fn apply_to(&self, user: &mut User) {
        if let Some(v) = &self.first_name {
            user.first_name = v.clone();
        }
        if let Some(v) = &self.last_name {
            user.last_name = v.clone();
        }
        if let Some(v) = &self.phone {
            user.phone = Some(v.clone());
        }
        if let Some(v) = &self.department {
            user.department = Some(v.clone());
        }
        if let Some(v) = &self.job_title {
            user.job_title = Some(v.clone());
        }
        if let Some(v) = &self.timezone {
            user.timezone = v.clone();
        }
        if let Some(v) = &self.language {
            user.language = v.clone();
        }
        if let Some(v) = &self.preferences {
            user.preferences = v.clone();
        }
    }

    /// The current values of exactly the fields this update touches.
    pub fn previous_values(&self, user: &User) -> serde_json::Value {
        let mut old = serde_json::Map::new();
        if self.first_name.is_some() {
            old.insert("first_name".into(), user.first_name.clone().into());
        }
        if self.last_name.is_some() {
            old.insert("last_name".into(), user.last_name.clone().into());
        }
        if self.phone.is_some() {
            old.insert("phone".into(), user.phone.clone().into());
        }
        if self.department.is_some() {
            old.insert("department".into(), user.department.clone().into());
        }
        if self.job_title.is_some() {
            old.insert("job_title".into(), user.job_title.clone().into());
        }
        if self.timezone.is_some() {
            old.insert("timezone".into(), user.timezone.clone().into());
        }
        if self.language.is_some() {
            old.insert("language".into(), user.language.clone().into());
        }
        if self.preferences.is_some() {
            old.insert("preferences".into(), user.preferences.clone());
        }
        serde_json::Value::Object(old)
    }
}
