use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Tenant boundary. Read-only from the auth core's point of view.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub org_type: String,
    pub subscription_plan: String,
    pub subscription_status: String,
    pub settings: serde_json::Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// A trial hospital tenant, used to seed local and test stores.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            org_type: "hospital".to_string(),
            subscription_plan: "trial".to_string(),
            subscription_status: "active".to_string(),
            settings: serde_json::json!({}),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
