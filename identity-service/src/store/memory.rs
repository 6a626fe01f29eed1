use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{IdentityStore, NewAccount, StoreError, StoreResult};
use crate::models::{
    Contact, ContactKind, Credential, MembershipStatus, Permission, RefreshToken, Role,
    RolePermission, User, UserSchoolMembership, UserType,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    contacts: HashMap<Uuid, Contact>,
    credentials: HashMap<Uuid, Credential>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    role_permissions: Vec<RolePermission>,
    role_permission_keys: HashSet<(Uuid, Uuid)>,
    memberships: HashMap<Uuid, UserSchoolMembership>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
}

/// Store backed by process memory, enforcing the same uniqueness rules as
/// the relational schema.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    refresh_token_writes_fail: AtomicBool,
    account_writes_fail: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes refresh token inserts and rotations fail while reads keep working.
    pub fn set_refresh_token_writes_fail(&self, fail: bool) {
        self.refresh_token_writes_fail.store(fail, Ordering::SeqCst);
    }

    /// Makes account inserts fail while single-row writes keep working.
    pub fn set_account_writes_fail(&self, fail: bool) {
        self.account_writes_fail.store(fail, Ordering::SeqCst);
    }

    /// All refresh token records of a user, newest first.
    pub fn refresh_tokens_for(&self, user_id: Uuid) -> Vec<RefreshToken> {
        let tables = match self.tables.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut tokens: Vec<RefreshToken> = tables
            .refresh_tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| b.issued_utc.cmp(&a.issued_utc));
        tokens
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.check_available()?;
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable(anyhow::anyhow!("in-memory store lock poisoned")))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.check_available()?;
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable(anyhow::anyhow!("in-memory store lock poisoned")))
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(anyhow::anyhow!(
                "in-memory store marked unavailable"
            )));
        }
        Ok(())
    }

    fn check_account_writes(&self) -> StoreResult<()> {
        if self.account_writes_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(anyhow::anyhow!("account writes failing")));
        }
        Ok(())
    }

    fn check_refresh_token_writes(&self) -> StoreResult<()> {
        if self.refresh_token_writes_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(anyhow::anyhow!(
                "refresh token writes failing"
            )));
        }
        Ok(())
    }
}

fn check_user(tables: &Tables, user: &User) -> StoreResult<()> {
    if tables.users.contains_key(&user.user_id) {
        return Err(StoreError::Conflict(format!("user {} already exists", user.user_id)));
    }
    Ok(())
}

fn check_contact(tables: &Tables, contact: &Contact) -> StoreResult<()> {
    let duplicate = tables.contacts.values().any(|c| {
        c.user_id == contact.user_id && c.kind == contact.kind && c.value == contact.value
    });
    if duplicate || tables.contacts.contains_key(&contact.contact_id) {
        return Err(StoreError::Conflict(format!(
            "contact {} already exists for user {}",
            contact.value, contact.user_id
        )));
    }
    Ok(())
}

fn check_credential(tables: &Tables, credential: &Credential) -> StoreResult<()> {
    if tables.credentials.contains_key(&credential.user_id) {
        return Err(StoreError::Conflict(format!(
            "credential already exists for user {}",
            credential.user_id
        )));
    }
    Ok(())
}

fn check_membership(tables: &Tables, membership: &UserSchoolMembership) -> StoreResult<()> {
    let duplicate = tables.memberships.values().any(|m| {
        m.user_id == membership.user_id
            && m.school_id == membership.school_id
            && m.role_id == membership.role_id
    });
    if duplicate {
        return Err(StoreError::Conflict(format!(
            "membership already exists for user {}",
            membership.user_id
        )));
    }
    Ok(())
}

fn insert_refresh_token_row(tables: &mut Tables, token: &RefreshToken) -> StoreResult<()> {
    if tables.refresh_tokens.contains_key(&token.token_id) {
        return Err(StoreError::Conflict(format!(
            "refresh token {} already exists",
            token.token_id
        )));
    }
    if tables
        .refresh_tokens
        .values()
        .any(|t| t.token_hash == token.token_hash)
    {
        return Err(StoreError::Conflict("refresh token hash already exists".to_string()));
    }
    tables.refresh_tokens.insert(token.token_id, token.clone());
    Ok(())
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        self.read().map(|_| ())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.write()?;
        check_user(&tables, user)?;
        tables.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.write()?;
        match tables.users.get_mut(&user.user_id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(StoreError::Conflict(format!("user {} does not exist", user.user_id))),
        }
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.get(&user_id).cloned())
    }

    async fn any_user_of_type(&self, user_type: UserType) -> StoreResult<bool> {
        Ok(self.read()?.users.values().any(|u| u.user_type == user_type))
    }

    async fn insert_account(&self, account: NewAccount<'_>) -> StoreResult<()> {
        self.check_account_writes()?;
        // Every check runs before the first insert, under one write guard.
        let mut tables = self.write()?;
        check_user(&tables, account.user)?;
        check_contact(&tables, account.contact)?;
        check_credential(&tables, account.credential)?;
        if let Some(membership) = account.membership {
            check_membership(&tables, membership)?;
        }

        tables.users.insert(account.user.user_id, account.user.clone());
        tables
            .contacts
            .insert(account.contact.contact_id, account.contact.clone());
        tables
            .credentials
            .insert(account.credential.user_id, account.credential.clone());
        if let Some(membership) = account.membership {
            tables
                .memberships
                .insert(membership.membership_id, membership.clone());
        }
        Ok(())
    }

    async fn insert_contact(&self, contact: &Contact) -> StoreResult<()> {
        let mut tables = self.write()?;
        check_contact(&tables, contact)?;
        tables.contacts.insert(contact.contact_id, contact.clone());
        Ok(())
    }

    async fn find_contact_by_email(&self, email: &str) -> StoreResult<Option<Contact>> {
        let tables = self.read()?;
        let best = tables
            .contacts
            .values()
            .filter(|c| c.kind == ContactKind::Email && c.value == email)
            .min_by(|a, b| {
                b.is_primary
                    .cmp(&a.is_primary)
                    .then(a.created_utc.cmp(&b.created_utc))
            })
            .cloned();
        Ok(best)
    }

    async fn find_contacts_by_user_id(&self, user_id: Uuid) -> StoreResult<Vec<Contact>> {
        let tables = self.read()?;
        let mut contacts: Vec<Contact> = tables
            .contacts
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.created_utc.cmp(&b.created_utc));
        Ok(contacts)
    }

    async fn insert_credential(&self, credential: &Credential) -> StoreResult<()> {
        let mut tables = self.write()?;
        check_credential(&tables, credential)?;
        tables.credentials.insert(credential.user_id, credential.clone());
        Ok(())
    }

    async fn find_credential_by_user_id(&self, user_id: Uuid) -> StoreResult<Option<Credential>> {
        Ok(self.read()?.credentials.get(&user_id).cloned())
    }

    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.roles.values().any(|r| r.role_code == role.role_code) {
            return Err(StoreError::Conflict(format!("role {} already exists", role.role_code)));
        }
        tables.roles.insert(role.role_id, role.clone());
        Ok(())
    }

    async fn find_role_by_code(&self, role_code: &str) -> StoreResult<Option<Role>> {
        Ok(self
            .read()?
            .roles
            .values()
            .find(|r| r.role_code == role_code)
            .cloned())
    }

    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables
            .permissions
            .values()
            .any(|p| p.perm_code == permission.perm_code)
        {
            return Err(StoreError::Conflict(format!(
                "permission {} already exists",
                permission.perm_code
            )));
        }
        tables
            .permissions
            .insert(permission.permission_id, permission.clone());
        Ok(())
    }

    async fn find_permission_by_code(&self, perm_code: &str) -> StoreResult<Option<Permission>> {
        Ok(self
            .read()?
            .permissions
            .values()
            .find(|p| p.perm_code == perm_code)
            .cloned())
    }

    async fn find_permissions_by_ids(&self, permission_ids: &[Uuid]) -> StoreResult<Vec<Permission>> {
        let tables = self.read()?;
        Ok(permission_ids
            .iter()
            .filter_map(|id| tables.permissions.get(id))
            .cloned()
            .collect())
    }

    async fn insert_role_permission(&self, link: &RolePermission) -> StoreResult<bool> {
        let mut tables = self.write()?;
        if !tables
            .role_permission_keys
            .insert((link.role_id, link.permission_id))
        {
            return Ok(false);
        }
        tables.role_permissions.push(link.clone());
        Ok(true)
    }

    async fn find_role_permissions_by_role_ids(
        &self,
        role_ids: &[Uuid],
    ) -> StoreResult<Vec<RolePermission>> {
        let tables = self.read()?;
        Ok(tables
            .role_permissions
            .iter()
            .filter(|link| role_ids.contains(&link.role_id))
            .cloned()
            .collect())
    }

    async fn insert_membership(&self, membership: &UserSchoolMembership) -> StoreResult<()> {
        let mut tables = self.write()?;
        check_membership(&tables, membership)?;
        tables
            .memberships
            .insert(membership.membership_id, membership.clone());
        Ok(())
    }

    async fn find_active_memberships_by_user_id(
        &self,
        user_id: Uuid,
    ) -> StoreResult<Vec<UserSchoolMembership>> {
        Ok(self
            .read()?
            .memberships
            .values()
            .filter(|m| m.user_id == user_id && m.status == MembershipStatus::Active)
            .cloned()
            .collect())
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> StoreResult<()> {
        self.check_refresh_token_writes()?;
        let mut tables = self.write()?;
        insert_refresh_token_row(&mut tables, token)
    }

    async fn find_refresh_token_by_hash(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        Ok(self
            .read()?
            .refresh_tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn revoke_refresh_token(
        &self,
        token_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.write()?;
        match tables.refresh_tokens.get_mut(&token_id) {
            Some(token) if !token.is_revoked() => {
                token.revoke(reason, now, None);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate_refresh_token(
        &self,
        previous_token_id: Uuid,
        replacement: &RefreshToken,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check_refresh_token_writes()?;
        // Single write guard: the check, the revoke and the insert are one step.
        let mut tables = self.write()?;

        let still_active = tables
            .refresh_tokens
            .get(&previous_token_id)
            .map(|t| t.is_active_at(now))
            .unwrap_or(false);
        if !still_active {
            return Ok(false);
        }

        insert_refresh_token_row(&mut tables, replacement)?;
        if let Some(previous) = tables.refresh_tokens.get_mut(&previous_token_id) {
            previous.revoke(reason, now, Some(replacement.token_id));
        }
        Ok(true)
    }
}
