//! Login, refresh and logout use cases.
//!
//! Every rejected login surfaces as the same `AuthenticationFailed` to the
//! caller; the step that rejected it is only written to the audit log.

use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::clock::Clock;
use super::error::{AuthFailure, ServiceError};
use super::events::{EventBus, IdentityEvent};
use super::jwt::TokenService;
use super::permissions::PermissionResolver;
use crate::models::{Contact, ContactKind, Credential, User, UserStatus, UserType};
use crate::store::IdentityStore;
use crate::utils::password::HASH_SIZE;
use crate::utils::{Password, PasswordHasher};

pub const TOKEN_TYPE: &str = "Bearer";
pub const LOGOUT_REASON: &str = "logout";
pub const EMAIL_CLAIM: &str = "email";

/// Stand-in hash verified when there is no real credential, so unknown
/// accounts cost one key derivation like a wrong password does.
const TIMING_EQUALIZER_HASH: [u8; HASH_SIZE] = [0u8; HASH_SIZE];

#[derive(Debug, Clone)]
pub struct LoginCommand {
    pub email: String,
    pub password: Password,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefreshCommand {
    pub refresh_token: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: Uuid,
    pub email: String,
    pub user_type: UserType,
    pub permissions: Vec<String>,
    pub must_change_password: bool,
}

#[derive(Debug, Clone)]
pub struct LoginSession {
    pub tokens: TokenPair,
    pub user: SessionUser,
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn IdentityStore>,
    hasher: PasswordHasher,
    tokens: TokenService,
    permissions: PermissionResolver,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        hasher: PasswordHasher,
        tokens: TokenService,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            permissions: PermissionResolver::new(store.clone()),
            store,
            hasher,
            tokens,
            events,
            clock,
        }
    }

    /// Authenticate by email and password and open a session.
    ///
    /// Nothing is persisted unless every check passes.
    pub async fn login(&self, command: LoginCommand) -> Result<LoginSession, ServiceError> {
        if command.password.is_blank() {
            return Err(ServiceError::InvalidArgument(
                "Password cannot be empty".to_string(),
            ));
        }

        let email = Contact::normalize(&command.email);
        let (contact, user, credential) = match self.authenticate(&email, &command.password).await {
            Ok(found) => found,
            Err(ServiceError::AuthenticationFailed(failure)) => {
                tracing::warn!(
                    step = failure.step(),
                    reason = %failure,
                    ip_address = command.ip_address.as_deref().unwrap_or("unknown"),
                    "Login failed"
                );
                return Err(failure.into());
            }
            Err(e) => return Err(e),
        };

        let permissions: Vec<String> = self
            .permissions
            .resolve_permissions(user.user_id)
            .await?
            .into_iter()
            .collect();

        let tokens = self
            .issue_tokens(
                &user,
                &contact.value,
                &permissions,
                command.ip_address.as_deref(),
                command.user_agent.as_deref(),
            )
            .await?;

        self.events.publish(IdentityEvent::LoginSucceeded {
            user_id: user.user_id,
            occurred_utc: self.clock.now(),
        });

        tracing::info!(
            user_id = %user.user_id,
            user_type = %user.user_type,
            permission_count = permissions.len(),
            must_change_password = credential.must_change_password,
            "Login succeeded"
        );

        Ok(LoginSession {
            tokens,
            user: SessionUser {
                user_id: user.user_id,
                email: contact.value,
                user_type: user.user_type,
                permissions,
                must_change_password: credential.must_change_password,
            },
        })
    }

    /// Exchange an active refresh token for a new token pair.
    ///
    /// The presented token is revoked in the same store operation that
    /// persists its replacement.
    pub async fn refresh(&self, command: RefreshCommand) -> Result<TokenPair, ServiceError> {
        let previous = match self.tokens.find_active_refresh_token(&command.refresh_token).await {
            Ok(record) => record,
            Err(ServiceError::AuthenticationFailed(failure)) => {
                tracing::warn!(step = failure.step(), reason = %failure, "Token refresh failed");
                return Err(failure.into());
            }
            Err(e) => return Err(e),
        };

        let user = self
            .store
            .find_user_by_id(previous.user_id)
            .await?
            .ok_or(AuthFailure::UserNotFound)?;
        if !user.is_active() {
            tracing::warn!(user_id = %user.user_id, status = %user.status, "Token refresh for inactive user");
            return Err(AuthFailure::UserInactive(user.status).into());
        }

        let email = self.primary_email(user.user_id).await?;
        let permissions: Vec<String> = self
            .permissions
            .resolve_permissions(user.user_id)
            .await?
            .into_iter()
            .collect();
        let access_token = self.tokens.generate_access_token(
            user.user_id,
            user.user_type,
            &permissions,
            &email_claims(email.as_deref()),
        )?;

        let rotated = self
            .tokens
            .rotate_refresh_token(
                &previous,
                command.ip_address.as_deref(),
                command.user_agent.as_deref(),
            )
            .await?;

        self.events.publish(IdentityEvent::RefreshTokenRotated {
            user_id: rotated.user_id,
            previous_token_id: rotated.previous_token_id,
            token_id: rotated.token_id,
            occurred_utc: self.clock.now(),
        });

        Ok(TokenPair {
            access_token,
            refresh_token: rotated.secret,
            expires_in: self.tokens.access_token_expiry_seconds(),
            token_type: TOKEN_TYPE,
        })
    }

    /// Revoke a refresh token. Unknown or already revoked tokens succeed.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), ServiceError> {
        if let Some(revoked) = self
            .tokens
            .revoke_refresh_token(refresh_token, LOGOUT_REASON)
            .await?
        {
            self.events.publish(IdentityEvent::RefreshTokenRevoked {
                user_id: revoked.user_id,
                token_id: revoked.token_id,
                reason: LOGOUT_REASON.to_string(),
                occurred_utc: self.clock.now(),
            });
        }
        Ok(())
    }

    async fn authenticate(
        &self,
        email: &str,
        password: &Password,
    ) -> Result<(Contact, User, Credential), ServiceError> {
        let contact = match self.store.find_contact_by_email(email).await? {
            Some(contact) => contact,
            None => return self.reject_without_verifying(password, AuthFailure::ContactNotFound).await,
        };

        let user = match self.store.find_user_by_id(contact.user_id).await? {
            Some(user) => user,
            None => return self.reject_without_verifying(password, AuthFailure::UserNotFound).await,
        };

        match user.status {
            UserStatus::Active => {}
            status @ (UserStatus::Pending | UserStatus::Disabled | UserStatus::Locked) => {
                return self
                    .reject_without_verifying(password, AuthFailure::UserInactive(status))
                    .await;
            }
        }

        let credential = match self.store.find_credential_by_user_id(user.user_id).await? {
            Some(credential) => credential,
            None => {
                return self
                    .reject_without_verifying(password, AuthFailure::CredentialNotFound)
                    .await
            }
        };

        let verified = self
            .hasher
            .verify_password_async(password.clone(), credential.password_hash.clone())
            .await?;
        if !verified {
            return Err(AuthFailure::PasswordMismatch.into());
        }

        Ok((contact, user, credential))
    }

    async fn reject_without_verifying<T>(
        &self,
        password: &Password,
        failure: AuthFailure,
    ) -> Result<T, ServiceError> {
        self.hasher
            .verify_password_async(password.clone(), TIMING_EQUALIZER_HASH.to_vec())
            .await?;
        Err(failure.into())
    }

    async fn issue_tokens(
        &self,
        user: &User,
        email: &str,
        permissions: &[String],
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<TokenPair, ServiceError> {
        let access_token = self.tokens.generate_access_token(
            user.user_id,
            user.user_type,
            permissions,
            &email_claims(Some(email)),
        )?;
        let refresh_token = self
            .tokens
            .generate_refresh_token(user.user_id, ip_address, user_agent)
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.tokens.access_token_expiry_seconds(),
            token_type: TOKEN_TYPE,
        })
    }

    async fn primary_email(&self, user_id: Uuid) -> Result<Option<String>, ServiceError> {
        let contacts = self.store.find_contacts_by_user_id(user_id).await?;
        let email = contacts
            .iter()
            .filter(|c| c.kind == ContactKind::Email)
            .max_by_key(|c| c.is_primary)
            .map(|c| c.value.clone());
        Ok(email)
    }
}

fn email_claims(email: Option<&str>) -> BTreeMap<String, String> {
    email
        .map(|e| BTreeMap::from([(EMAIL_CLAIM.to_string(), e.to_string())]))
        .unwrap_or_default()
}
