//! Role model - named permission bundles granted through memberships.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::ModelError;

/// Role entity. `role_code` is unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub role_id: Uuid,
    pub role_code: String,
    pub description: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Role {
    pub fn new(role_code: &str, description: &str, now: DateTime<Utc>) -> Result<Self, ModelError> {
        let role_code = role_code.trim();
        let description = description.trim();
        if role_code.is_empty() {
            return Err(ModelError::EmptyField("Role code"));
        }
        if description.is_empty() {
            return Err(ModelError::EmptyField("Description"));
        }

        Ok(Self {
            role_id: Uuid::new_v4(),
            role_code: role_code.to_string(),
            description: description.to_string(),
            created_utc: now,
            updated_utc: now,
        })
    }
}

/// Role to permission link, unique per `(role_id, permission_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub created_utc: DateTime<Utc>,
}

impl RolePermission {
    pub fn new(role_id: Uuid, permission_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            role_id,
            permission_id,
            created_utc: now,
        }
    }
}
