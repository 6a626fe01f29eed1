//! Contact model - email addresses and phone numbers owned by a user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactKind {
    Email,
    Phone,
}

impl ContactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactKind::Email => "email",
            ContactKind::Phone => "phone",
        }
    }
}

impl std::str::FromStr for ContactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(ContactKind::Email),
            "phone" => Ok(ContactKind::Phone),
            _ => Err(format!("Invalid contact kind: {}", s)),
        }
    }
}

/// Contact entity. `(user_id, kind, value)` is unique; email contacts are
/// the login lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub contact_id: Uuid,
    pub user_id: Uuid,
    pub kind: ContactKind,
    pub value: String,
    pub is_primary: bool,
    pub is_verified: bool,
    pub verified_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Contact {
    pub fn new(
        user_id: Uuid,
        kind: ContactKind,
        value: &str,
        is_primary: bool,
        now: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        let value = Self::normalize(value);
        if value.is_empty() {
            return Err(ModelError::EmptyField("Contact value"));
        }

        Ok(Self {
            contact_id: Uuid::new_v4(),
            user_id,
            kind,
            value,
            is_primary,
            is_verified: false,
            verified_utc: None,
            created_utc: now,
            updated_utc: now,
        })
    }

    /// Canonical stored form of a contact value.
    pub fn normalize(value: &str) -> String {
        value.trim().to_lowercase()
    }

    pub fn mark_verified(&mut self, now: DateTime<Utc>) {
        self.is_verified = true;
        self.verified_utc = Some(now);
        self.updated_utc = now;
    }

    pub fn set_primary(&mut self, now: DateTime<Utc>) {
        self.is_primary = true;
        self.updated_utc = now;
    }

    pub fn unset_primary(&mut self, now: DateTime<Utc>) {
        self.is_primary = false;
        self.updated_utc = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_value_is_normalized() {
        let contact = Contact::new(
            Uuid::new_v4(),
            ContactKind::Email,
            "  Admin@Platform.LOCAL ",
            true,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(contact.value, "admin@platform.local");
        assert!(!contact.is_verified);
    }

    #[test]
    fn test_blank_contact_rejected() {
        let result = Contact::new(Uuid::new_v4(), ContactKind::Phone, "   ", false, Utc::now());
        assert_eq!(result, Err(ModelError::EmptyField("Contact value")));
    }

    #[test]
    fn test_mark_verified_stamps_time() {
        let now = Utc::now();
        let mut contact =
            Contact::new(Uuid::new_v4(), ContactKind::Email, "a@b.io", false, now).unwrap();
        contact.mark_verified(now);
        assert!(contact.is_verified);
        assert_eq!(contact.verified_utc, Some(now));
    }
}
