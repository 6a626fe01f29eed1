//! Permission model - fine-grained capability codes such as `grades.post`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::ModelError;

/// Permission entity. `perm_code` is unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub permission_id: Uuid,
    pub perm_code: String,
    pub description: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Permission {
    pub fn new(perm_code: &str, description: &str, now: DateTime<Utc>) -> Result<Self, ModelError> {
        let perm_code = perm_code.trim();
        let description = description.trim();
        if perm_code.is_empty() {
            return Err(ModelError::EmptyField("Permission code"));
        }
        if description.is_empty() {
            return Err(ModelError::EmptyField("Description"));
        }

        Ok(Self {
            permission_id: Uuid::new_v4(),
            perm_code: perm_code.to_string(),
            description: description.to_string(),
            created_utc: now,
            updated_utc: now,
        })
    }
}
