//! Persistence port for identity records.
//!
//! Services depend on [`IdentityStore`] only. [`PgStore`] backs production;
//! [`InMemoryStore`] backs local runs and tests.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Contact, Credential, Permission, RefreshToken, Role, RolePermission, User, UserSchoolMembership,
    UserType,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(anyhow::Error),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A user together with everything it needs to sign in.
#[derive(Debug, Clone, Copy)]
pub struct NewAccount<'a> {
    pub user: &'a User,
    pub contact: &'a Contact,
    pub credential: &'a Credential,
    pub membership: Option<&'a UserSchoolMembership>,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;

    // Users

    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn update_user(&self, user: &User) -> StoreResult<()>;
    async fn find_user_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>>;
    async fn any_user_of_type(&self, user_type: UserType) -> StoreResult<bool>;
    /// Writes a user with its sign-in records as one unit: either every
    /// row is stored or none is.
    async fn insert_account(&self, account: NewAccount<'_>) -> StoreResult<()>;

    // Contacts

    async fn insert_contact(&self, contact: &Contact) -> StoreResult<()>;
    /// Email contact with this normalized value. When several users share
    /// the address, primary contacts win, then the oldest.
    async fn find_contact_by_email(&self, email: &str) -> StoreResult<Option<Contact>>;
    async fn find_contacts_by_user_id(&self, user_id: Uuid) -> StoreResult<Vec<Contact>>;

    // Credentials

    async fn insert_credential(&self, credential: &Credential) -> StoreResult<()>;
    async fn find_credential_by_user_id(&self, user_id: Uuid) -> StoreResult<Option<Credential>>;

    // Roles and permissions

    async fn insert_role(&self, role: &Role) -> StoreResult<()>;
    async fn find_role_by_code(&self, role_code: &str) -> StoreResult<Option<Role>>;
    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()>;
    async fn find_permission_by_code(&self, perm_code: &str) -> StoreResult<Option<Permission>>;
    async fn find_permissions_by_ids(&self, permission_ids: &[Uuid]) -> StoreResult<Vec<Permission>>;
    /// Returns false when the link already existed.
    async fn insert_role_permission(&self, link: &RolePermission) -> StoreResult<bool>;
    async fn find_role_permissions_by_role_ids(
        &self,
        role_ids: &[Uuid],
    ) -> StoreResult<Vec<RolePermission>>;

    // Memberships

    async fn insert_membership(&self, membership: &UserSchoolMembership) -> StoreResult<()>;
    async fn find_active_memberships_by_user_id(
        &self,
        user_id: Uuid,
    ) -> StoreResult<Vec<UserSchoolMembership>>;

    // Refresh tokens

    async fn insert_refresh_token(&self, token: &RefreshToken) -> StoreResult<()>;
    async fn find_refresh_token_by_hash(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>>;
    /// Revokes the token if it is not already revoked. Returns whether this
    /// call performed the revocation.
    async fn revoke_refresh_token(
        &self,
        token_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
    /// Atomically revokes `previous_token_id` (only if still active at `now`)
    /// and inserts `replacement`. Returns false and writes nothing when the
    /// previous token was no longer active.
    async fn rotate_refresh_token(
        &self,
        previous_token_id: Uuid,
        replacement: &RefreshToken,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
}
