//! User model - identity root with a closed type and status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::ModelError;

/// Role class of a user. Serialized by variant name, which is also the
/// value of the `user_type` access-token claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserType {
    SystemAdmin,
    Principal,
    Deputy,
    Teacher,
    Accountant,
    InfoDesk,
    TransportMgr,
    Parent,
    Student,
}

impl UserType {
    pub const ALL: [UserType; 9] = [
        UserType::SystemAdmin,
        UserType::Principal,
        UserType::Deputy,
        UserType::Teacher,
        UserType::Accountant,
        UserType::InfoDesk,
        UserType::TransportMgr,
        UserType::Parent,
        UserType::Student,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::SystemAdmin => "SystemAdmin",
            UserType::Principal => "Principal",
            UserType::Deputy => "Deputy",
            UserType::Teacher => "Teacher",
            UserType::Accountant => "Accountant",
            UserType::InfoDesk => "InfoDesk",
            UserType::TransportMgr => "TransportMgr",
            UserType::Parent => "Parent",
            UserType::Student => "Student",
        }
    }

    /// Platform administrators must always stay reachable.
    pub fn can_be_disabled(&self) -> bool {
        match self {
            UserType::SystemAdmin => false,
            UserType::Principal
            | UserType::Deputy
            | UserType::Teacher
            | UserType::Accountant
            | UserType::InfoDesk
            | UserType::TransportMgr
            | UserType::Parent
            | UserType::Student => true,
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UserType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid user type: {}", s))
    }
}

/// User status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Disabled,
    Pending,
    Locked,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Disabled => "disabled",
            UserStatus::Pending => "pending",
            UserStatus::Locked => "locked",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "disabled" => Ok(UserStatus::Disabled),
            "pending" => Ok(UserStatus::Pending),
            "locked" => Ok(UserStatus::Locked),
            _ => Err(format!("Invalid user status: {}", s)),
        }
    }
}

/// Record of an effective status change, handed back to the caller so it
/// can be published after the new state is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatusChange {
    pub user_id: Uuid,
    pub from: UserStatus,
    pub to: UserStatus,
    pub occurred_utc: DateTime<Utc>,
}

/// User entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: Uuid,
    pub user_type: UserType,
    pub status: UserStatus,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    /// Create a new user. Users start out pending until explicitly activated.
    pub fn new(user_type: UserType, now: DateTime<Utc>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            user_type,
            status: UserStatus::Pending,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    pub fn is_locked(&self) -> bool {
        self.status == UserStatus::Locked
    }

    pub fn activate(&mut self, now: DateTime<Utc>) -> Option<UserStatusChange> {
        match self.status {
            UserStatus::Active => None,
            UserStatus::Pending | UserStatus::Disabled | UserStatus::Locked => {
                Some(self.transition(UserStatus::Active, now))
            }
        }
    }

    pub fn disable(&mut self, now: DateTime<Utc>) -> Result<Option<UserStatusChange>, ModelError> {
        match self.status {
            UserStatus::Disabled => Ok(None),
            UserStatus::Active | UserStatus::Pending | UserStatus::Locked => {
                if !self.user_type.can_be_disabled() {
                    return Err(ModelError::SystemAdminCannotBeDisabled);
                }
                Ok(Some(self.transition(UserStatus::Disabled, now)))
            }
        }
    }

    pub fn lock(&mut self, now: DateTime<Utc>) -> Option<UserStatusChange> {
        match self.status {
            UserStatus::Locked => None,
            UserStatus::Active | UserStatus::Pending | UserStatus::Disabled => {
                Some(self.transition(UserStatus::Locked, now))
            }
        }
    }

    pub fn unlock(&mut self, now: DateTime<Utc>) -> Result<UserStatusChange, ModelError> {
        match self.status {
            UserStatus::Locked => Ok(self.transition(UserStatus::Active, now)),
            status @ (UserStatus::Active | UserStatus::Pending | UserStatus::Disabled) => {
                Err(ModelError::NotLocked(status))
            }
        }
    }

    fn transition(&mut self, to: UserStatus, now: DateTime<Utc>) -> UserStatusChange {
        let from = self.status;
        self.status = to;
        self.updated_utc = now;
        UserStatusChange {
            user_id: self.user_id,
            from,
            to,
            occurred_utc: now,
        }
    }
}
