//! PostgreSQL implementation of [`IdentityStore`].
//!
//! Enum columns are stored as their text codes and parsed back on read; an
//! unknown code surfaces as [`StoreError::Corrupt`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

use super::{IdentityStore, NewAccount, StoreError, StoreResult};
use crate::models::{
    Contact, Credential, MembershipStatus, Permission, RefreshToken, Role, RolePermission, User,
    UserSchoolMembership, UserType,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => {
            tracing::error!(error = %err, "Database query failed");
            StoreError::Unavailable(anyhow::Error::new(err))
        }
    }
}

fn parse_code<T>(value: &str) -> StoreResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(StoreError::Corrupt)
}

#[derive(FromRow)]
struct UserRow {
    user_id: Uuid,
    user_type: String,
    status: String,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            user_id: row.user_id,
            user_type: parse_code(&row.user_type)?,
            status: parse_code(&row.status)?,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct ContactRow {
    contact_id: Uuid,
    user_id: Uuid,
    kind: String,
    value: String,
    is_primary: bool,
    is_verified: bool,
    verified_utc: Option<DateTime<Utc>>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<ContactRow> for Contact {
    type Error = StoreError;

    fn try_from(row: ContactRow) -> Result<Self, Self::Error> {
        Ok(Contact {
            contact_id: row.contact_id,
            user_id: row.user_id,
            kind: parse_code(&row.kind)?,
            value: row.value,
            is_primary: row.is_primary,
            is_verified: row.is_verified,
            verified_utc: row.verified_utc,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct CredentialRow {
    credential_id: Uuid,
    user_id: Uuid,
    password_hash: Option<Vec<u8>>,
    mfa_mode: String,
    must_change_password: bool,
    last_password_changed_utc: Option<DateTime<Utc>>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = StoreError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        Ok(Credential {
            credential_id: row.credential_id,
            user_id: row.user_id,
            // A NULL hash never verifies.
            password_hash: row.password_hash.unwrap_or_default(),
            mfa_mode: parse_code(&row.mfa_mode)?,
            must_change_password: row.must_change_password,
            last_password_changed_utc: row.last_password_changed_utc,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct RoleRow {
    role_id: Uuid,
    role_code: String,
    description: String,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            role_id: row.role_id,
            role_code: row.role_code,
            description: row.description,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

#[derive(FromRow)]
struct PermissionRow {
    permission_id: Uuid,
    perm_code: String,
    description: String,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Permission {
            permission_id: row.permission_id,
            perm_code: row.perm_code,
            description: row.description,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

#[derive(FromRow)]
struct RolePermissionRow {
    role_id: Uuid,
    permission_id: Uuid,
    created_utc: DateTime<Utc>,
}

impl From<RolePermissionRow> for RolePermission {
    fn from(row: RolePermissionRow) -> Self {
        RolePermission {
            role_id: row.role_id,
            permission_id: row.permission_id,
            created_utc: row.created_utc,
        }
    }
}

#[derive(FromRow)]
struct MembershipRow {
    membership_id: Uuid,
    user_id: Uuid,
    school_id: Option<Uuid>,
    role_id: Uuid,
    status: String,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl TryFrom<MembershipRow> for UserSchoolMembership {
    type Error = StoreError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        Ok(UserSchoolMembership {
            membership_id: row.membership_id,
            user_id: row.user_id,
            school_id: row.school_id,
            role_id: row.role_id,
            status: parse_code(&row.status)?,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

#[derive(FromRow)]
struct RefreshTokenRow {
    token_id: Uuid,
    user_id: Uuid,
    token_hash: String,
    issued_utc: DateTime<Utc>,
    expires_utc: DateTime<Utc>,
    revoked_utc: Option<DateTime<Utc>>,
    revoked_reason: Option<String>,
    replaced_by_token_id: Option<Uuid>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshToken {
    fn from(row: RefreshTokenRow) -> Self {
        RefreshToken {
            token_id: row.token_id,
            user_id: row.user_id,
            token_hash: row.token_hash,
            issued_utc: row.issued_utc,
            expires_utc: row.expires_utc,
            revoked_utc: row.revoked_utc,
            revoked_reason: row.revoked_reason,
            replaced_by_token_id: row.replaced_by_token_id,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

async fn insert_user_row<'e, E>(executor: E, user: &User) -> StoreResult<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO users (user_id, user_type, status, created_utc, updated_utc)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user.user_id)
    .bind(user.user_type.as_str())
    .bind(user.status.as_str())
    .bind(user.created_utc)
    .bind(user.updated_utc)
    .execute(executor)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

async fn insert_contact_row<'e, E>(executor: E, contact: &Contact) -> StoreResult<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO contacts (
            contact_id, user_id, kind, value, is_primary, is_verified,
            verified_utc, created_utc, updated_utc
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(contact.contact_id)
    .bind(contact.user_id)
    .bind(contact.kind.as_str())
    .bind(&contact.value)
    .bind(contact.is_primary)
    .bind(contact.is_verified)
    .bind(contact.verified_utc)
    .bind(contact.created_utc)
    .bind(contact.updated_utc)
    .execute(executor)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

async fn insert_credential_row<'e, E>(executor: E, credential: &Credential) -> StoreResult<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO credentials (
            credential_id, user_id, password_hash, mfa_mode, must_change_password,
            last_password_changed_utc, created_utc, updated_utc
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(credential.credential_id)
    .bind(credential.user_id)
    .bind(&credential.password_hash)
    .bind(credential.mfa_mode.as_str())
    .bind(credential.must_change_password)
    .bind(credential.last_password_changed_utc)
    .bind(credential.created_utc)
    .bind(credential.updated_utc)
    .execute(executor)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

async fn insert_membership_row<'e, E>(executor: E, membership: &UserSchoolMembership) -> StoreResult<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO user_school_memberships (
            membership_id, user_id, school_id, role_id, status, created_utc, updated_utc
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(membership.membership_id)
    .bind(membership.user_id)
    .bind(membership.school_id)
    .bind(membership.role_id)
    .bind(membership.status.as_str())
    .bind(membership.created_utc)
    .bind(membership.updated_utc)
    .execute(executor)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

const INSERT_REFRESH_TOKEN: &str = r#"
    INSERT INTO refresh_tokens (
        token_id, user_id, token_hash, issued_utc, expires_utc,
        revoked_utc, revoked_reason, replaced_by_token_id,
        ip_address, user_agent, created_utc, updated_utc
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
"#;

fn bind_refresh_token<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    token: &'q RefreshToken,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(token.token_id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.issued_utc)
        .bind(token.expires_utc)
        .bind(token.revoked_utc)
        .bind(&token.revoked_reason)
        .bind(token.replaced_by_token_id)
        .bind(&token.ip_address)
        .bind(&token.user_agent)
        .bind(token.created_utc)
        .bind(token.updated_utc)
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        insert_user_row(&self.pool, user).await
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET user_type = $2, status = $3, updated_utc = $4 WHERE user_id = $1",
        )
        .bind(user.user_id)
        .bind(user.user_type.as_str())
        .bind(user.status.as_str())
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("user {} does not exist", user.user_id)));
        }
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .map(User::try_from)
            .transpose()
    }

    async fn any_user_of_type(&self, user_type: UserType) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE user_type = $1)")
            .bind(user_type.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)
    }

    async fn insert_account(&self, account: NewAccount<'_>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        insert_user_row(&mut *tx, account.user).await?;
        insert_contact_row(&mut *tx, account.contact).await?;
        insert_credential_row(&mut *tx, account.credential).await?;
        if let Some(membership) = account.membership {
            insert_membership_row(&mut *tx, membership).await?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn insert_contact(&self, contact: &Contact) -> StoreResult<()> {
        insert_contact_row(&self.pool, contact).await
    }

    async fn find_contact_by_email(&self, email: &str) -> StoreResult<Option<Contact>> {
        sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT * FROM contacts
            WHERE kind = 'email' AND value = $1
            ORDER BY is_primary DESC, created_utc ASC
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .map(Contact::try_from)
        .transpose()
    }

    async fn find_contacts_by_user_id(&self, user_id: Uuid) -> StoreResult<Vec<Contact>> {
        sqlx::query_as::<_, ContactRow>(
            "SELECT * FROM contacts WHERE user_id = $1 ORDER BY created_utc ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?
        .into_iter()
        .map(Contact::try_from)
        .collect()
    }

    async fn insert_credential(&self, credential: &Credential) -> StoreResult<()> {
        insert_credential_row(&self.pool, credential).await
    }

    async fn find_credential_by_user_id(&self, user_id: Uuid) -> StoreResult<Option<Credential>> {
        sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .map(Credential::try_from)
            .transpose()
    }

    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO roles (role_id, role_code, description, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(role.role_id)
        .bind(&role.role_code)
        .bind(&role.description)
        .bind(role.created_utc)
        .bind(role.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn find_role_by_code(&self, role_code: &str) -> StoreResult<Option<Role>> {
        Ok(
            sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE role_code = $1")
                .bind(role_code)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?
                .map(Role::from),
        )
    }

    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO permissions (permission_id, perm_code, description, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(permission.permission_id)
        .bind(&permission.perm_code)
        .bind(&permission.description)
        .bind(permission.created_utc)
        .bind(permission.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn find_permission_by_code(&self, perm_code: &str) -> StoreResult<Option<Permission>> {
        Ok(
            sqlx::query_as::<_, PermissionRow>("SELECT * FROM permissions WHERE perm_code = $1")
                .bind(perm_code)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?
                .map(Permission::from),
        )
    }

    async fn find_permissions_by_ids(&self, permission_ids: &[Uuid]) -> StoreResult<Vec<Permission>> {
        Ok(
            sqlx::query_as::<_, PermissionRow>(
                "SELECT * FROM permissions WHERE permission_id = ANY($1)",
            )
            .bind(permission_ids.to_vec())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(Permission::from)
            .collect(),
        )
    }

    async fn insert_role_permission(&self, link: &RolePermission) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id, created_utc)
            VALUES ($1, $2, $3)
            ON CONFLICT (role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(link.role_id)
        .bind(link.permission_id)
        .bind(link.created_utc)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_role_permissions_by_role_ids(
        &self,
        role_ids: &[Uuid],
    ) -> StoreResult<Vec<RolePermission>> {
        Ok(
            sqlx::query_as::<_, RolePermissionRow>(
                "SELECT * FROM role_permissions WHERE role_id = ANY($1)",
            )
            .bind(role_ids.to_vec())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(RolePermission::from)
            .collect(),
        )
    }

    async fn insert_membership(&self, membership: &UserSchoolMembership) -> StoreResult<()> {
        insert_membership_row(&self.pool, membership).await
    }

    async fn find_active_memberships_by_user_id(
        &self,
        user_id: Uuid,
    ) -> StoreResult<Vec<UserSchoolMembership>> {
        sqlx::query_as::<_, MembershipRow>(
            "SELECT * FROM user_school_memberships WHERE user_id = $1 AND status = $2",
        )
        .bind(user_id)
        .bind(MembershipStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?
        .into_iter()
        .map(UserSchoolMembership::try_from)
        .collect()
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> StoreResult<()> {
        bind_refresh_token(sqlx::query(INSERT_REFRESH_TOKEN), token)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn find_refresh_token_by_hash(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        Ok(
            sqlx::query_as::<_, RefreshTokenRow>("SELECT * FROM refresh_tokens WHERE token_hash = $1")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?
                .map(RefreshToken::from),
        )
    }

    async fn revoke_refresh_token(
        &self,
        token_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_utc = $2, revoked_reason = $3, updated_utc = $2
            WHERE token_id = $1 AND revoked_utc IS NULL
            "#,
        )
        .bind(token_id)
        .bind(now)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn rotate_refresh_token(
        &self,
        previous_token_id: Uuid,
        replacement: &RefreshToken,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let revoked = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_utc = $2, revoked_reason = $3, replaced_by_token_id = $4, updated_utc = $2
            WHERE token_id = $1 AND revoked_utc IS NULL AND expires_utc > $2
            "#,
        )
        .bind(previous_token_id)
        .bind(now)
        .bind(reason)
        .bind(replacement.token_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if revoked.rows_affected() != 1 {
            tx.rollback().await.map_err(map_sqlx)?;
            return Ok(false);
        }

        bind_refresh_token(sqlx::query(INSERT_REFRESH_TOKEN), replacement)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(true)
    }
}
