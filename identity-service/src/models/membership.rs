//! Membership model - grants a user a role within a school.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Active,
    Disabled,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Disabled => "disabled",
        }
    }
}

impl std::str::FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MembershipStatus::Active),
            "disabled" => Ok(MembershipStatus::Disabled),
            _ => Err(format!("Invalid membership status: {}", s)),
        }
    }
}

/// User-school-role grant, unique per `(user_id, school_id, role_id)`.
///
/// `school_id` is `None` for platform-wide roles such as SystemAdmin.
/// School and role are referenced by id only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSchoolMembership {
    pub membership_id: Uuid,
    pub user_id: Uuid,
    pub school_id: Option<Uuid>,
    pub role_id: Uuid,
    pub status: MembershipStatus,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl UserSchoolMembership {
    pub fn new(user_id: Uuid, school_id: Option<Uuid>, role_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            membership_id: Uuid::new_v4(),
            user_id,
            school_id,
            role_id,
            status: MembershipStatus::Active,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }

    /// Whether this grant applies inside `school_id`. Platform-wide grants
    /// apply everywhere.
    pub fn applies_to_school(&self, school_id: Uuid) -> bool {
        match self.school_id {
            None => true,
            Some(own) => own == school_id,
        }
    }

    /// Returns true when the status changed.
    pub fn activate(&mut self, now: DateTime<Utc>) -> bool {
        self.set_status(MembershipStatus::Active, now)
    }

    /// Returns true when the status changed.
    pub fn disable(&mut self, now: DateTime<Utc>) -> bool {
        self.set_status(MembershipStatus::Disabled, now)
    }

    fn set_status(&mut self, status: MembershipStatus, now: DateTime<Utc>) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.updated_utc = now;
        true
    }
}
