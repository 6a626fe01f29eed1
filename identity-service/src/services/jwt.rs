use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::clock::Clock;
use super::error::{AuthFailure, ServiceError};
use crate::config::{JwtConfig, MIN_JWT_SECRET_BYTES};
use crate::models::{RefreshToken, UserType};
use crate::store::IdentityStore;

/// Claim carrying the caller's permission codes.
pub const PERMISSION_CLAIM: &str = "permission";
pub const USER_TYPE_CLAIM: &str = "user_type";
/// Random bytes behind each refresh token secret.
pub const REFRESH_TOKEN_BYTES: usize = 64;
pub const ROTATION_REASON: &str = "rotated";

/// Claim names the service sets itself; callers may not override them.
const RESERVED_CLAIMS: [&str; 9] = [
    "sub",
    "jti",
    USER_TYPE_CLAIM,
    PERMISSION_CLAIM,
    "iss",
    "aud",
    "nbf",
    "exp",
    "iat",
];

/// A claim that is a single string when there is one value and an array
/// when there are several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValues {
    One(String),
    Many(Vec<String>),
}

impl ClaimValues {
    fn from_codes(codes: &[String]) -> Option<Self> {
        match codes {
            [] => None,
            [single] => Some(ClaimValues::One(single.clone())),
            many => Some(ClaimValues::Many(many.to_vec())),
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        match self {
            ClaimValues::One(value) => vec![value.clone()],
            ClaimValues::Many(values) => values.clone(),
        }
    }
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// JWT ID
    pub jti: String,
    pub user_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<ClaimValues>,
    pub iss: String,
    pub aud: String,
    pub nbf: i64,
    pub exp: i64,
    pub iat: i64,
    /// Caller supplied claims such as `email`
    #[serde(flatten)]
    pub additional: BTreeMap<String, String>,
}

impl AccessTokenClaims {
    pub fn permissions(&self) -> Vec<String> {
        self.permission
            .as_ref()
            .map(ClaimValues::to_vec)
            .unwrap_or_default()
    }

    pub fn user_id(&self) -> Result<Uuid, ServiceError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| ServiceError::AuthenticationFailed(AuthFailure::AccessTokenInvalid))
    }
}

/// Outcome of a successful refresh token rotation.
#[derive(Debug, Clone)]
pub struct RotatedRefreshToken {
    pub user_id: Uuid,
    pub previous_token_id: Uuid,
    pub token_id: Uuid,
    /// Plaintext secret of the replacement; returned once, never stored
    pub secret: String,
}

/// Issues HS256 access tokens and manages opaque refresh tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
    store: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(
        config: &JwtConfig,
        store: Arc<dyn IdentityStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        let secret = config.secret_key.expose_secret().as_bytes();
        if secret.len() < MIN_JWT_SECRET_BYTES {
            return Err(ServiceError::InvalidArgument(format!(
                "JWT secret must be at least {} bytes",
                MIN_JWT_SECRET_BYTES
            )));
        }
        if config.access_token_expiry_minutes <= 0 || config.refresh_token_expiry_days <= 0 {
            return Err(ServiceError::InvalidArgument(
                "Token lifetimes must be positive".to_string(),
            ));
        }

        tracing::info!(issuer = %config.issuer, audience = %config.audience, "Token service initialized with HS256 key");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
            store,
            clock,
        })
    }

    /// Generate a signed access token.
    ///
    /// `permissions` are emitted in the given order.
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        user_type: UserType,
        permissions: &[String],
        additional_claims: &BTreeMap<String, String>,
    ) -> Result<String, ServiceError> {
        if let Some(key) = additional_claims
            .keys()
            .find(|key| RESERVED_CLAIMS.contains(&key.as_str()))
        {
            return Err(ServiceError::InvalidArgument(format!(
                "Claim '{}' is reserved",
                key
            )));
        }

        let now = self.clock.now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            user_type: user_type.as_str().to_string(),
            permission: ClaimValues::from_codes(permissions),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            nbf: now.timestamp(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            additional: additional_claims.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        Ok(token)
    }

    /// Validate signature, issuer, audience and lifetime with zero skew.
    ///
    /// Lifetime is checked against the service clock, so a token is valid
    /// for `nbf <= now < exp`.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss", "aud"]);

        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                ServiceError::AuthenticationFailed(AuthFailure::AccessTokenInvalid)
            })?;

        let now = self.clock.now().timestamp();
        if now < claims.nbf || now >= claims.exp {
            tracing::debug!(nbf = claims.nbf, exp = claims.exp, now, "Access token outside its lifetime");
            return Err(AuthFailure::AccessTokenInvalid.into());
        }

        Ok(claims)
    }

    /// Create and persist a refresh token; returns the plaintext secret.
    pub async fn generate_refresh_token(
        &self,
        user_id: Uuid,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<String, ServiceError> {
        let (secret, record) = self.new_refresh_token(user_id, ip_address, user_agent);
        self.store.insert_refresh_token(&record).await?;

        tracing::info!(user_id = %user_id, token_id = %record.token_id, "Refresh token issued");
        Ok(secret)
    }

    /// True iff the token exists, belongs to `user_id`, and is active now.
    pub async fn validate_refresh_token(&self, token: &str, user_id: Uuid) -> Result<bool, ServiceError> {
        let now = self.clock.now();
        let record = self
            .store
            .find_refresh_token_by_hash(&RefreshToken::hash_token(token))
            .await?;

        Ok(matches!(record, Some(r) if r.user_id == user_id && r.is_active_at(now)))
    }

    /// Active record behind a presented secret.
    pub async fn find_active_refresh_token(&self, token: &str) -> Result<RefreshToken, ServiceError> {
        let now = self.clock.now();
        let record = self
            .store
            .find_refresh_token_by_hash(&RefreshToken::hash_token(token))
            .await?
            .ok_or(AuthFailure::RefreshTokenUnknown)?;

        if record.is_active_at(now) {
            return Ok(record);
        }

        if record.replaced_by_token_id.is_some() {
            tracing::warn!(
                user_id = %record.user_id,
                token_id = %record.token_id,
                "Rotated refresh token presented again"
            );
            return Err(AuthFailure::RefreshTokenReused.into());
        }

        Err(AuthFailure::RefreshTokenInactive.into())
    }

    /// Revoke the token behind `token` if it exists and is not yet revoked.
    ///
    /// Unknown and already revoked tokens are a no-op; an earlier revocation
    /// reason is kept. Returns the record this call revoked, if any.
    pub async fn revoke_refresh_token(
        &self,
        token: &str,
        reason: &str,
    ) -> Result<Option<RefreshToken>, ServiceError> {
        let record = match self
            .store
            .find_refresh_token_by_hash(&RefreshToken::hash_token(token))
            .await?
        {
            Some(record) => record,
            None => {
                tracing::debug!("Revocation requested for unknown refresh token");
                return Ok(None);
            }
        };

        if record.is_revoked() {
            tracing::debug!(token_id = %record.token_id, "Refresh token already revoked");
            return Ok(None);
        }

        let now = self.clock.now();
        if !self
            .store
            .revoke_refresh_token(record.token_id, reason, now)
            .await?
        {
            return Ok(None);
        }

        tracing::info!(
            user_id = %record.user_id,
            token_id = %record.token_id,
            reason,
            "Refresh token revoked"
        );

        let mut revoked = record;
        revoked.revoke(reason, now, None);
        Ok(Some(revoked))
    }

    /// Replace `previous` with a fresh token in one atomic store operation.
    ///
    /// Fails with `RefreshTokenReused` if `previous` stopped being active
    /// since it was read.
    pub async fn rotate_refresh_token(
        &self,
        previous: &RefreshToken,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<RotatedRefreshToken, ServiceError> {
        let (secret, replacement) = self.new_refresh_token(previous.user_id, ip_address, user_agent);
        let now = self.clock.now();

        let rotated = self
            .store
            .rotate_refresh_token(previous.token_id, &replacement, ROTATION_REASON, now)
            .await?;
        if !rotated {
            tracing::warn!(
                user_id = %previous.user_id,
                token_id = %previous.token_id,
                "Refresh token rotation lost a race"
            );
            return Err(AuthFailure::RefreshTokenReused.into());
        }

        tracing::info!(
            user_id = %previous.user_id,
            previous_token_id = %previous.token_id,
            token_id = %replacement.token_id,
            "Refresh token rotated"
        );

        Ok(RotatedRefreshToken {
            user_id: previous.user_id,
            previous_token_id: previous.token_id,
            token_id: replacement.token_id,
            secret,
        })
    }

    /// Get access token expiry in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    fn new_refresh_token(
        &self,
        user_id: Uuid,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> (String, RefreshToken) {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let secret = STANDARD.encode(bytes);

        let record = RefreshToken::new(
            user_id,
            RefreshToken::hash_token(&secret),
            self.clock.now(),
            self.refresh_token_expiry_days,
            ip_address.map(str::to_string),
            user_agent.map(str::to_string),
        );
        (secret, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::{FixedClock, SystemClock};
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use secrecy::SecretString;

    const SECRET: &str = "test-secret-key-that-is-long-enough-for-hs256";

    fn jwt_config() -> JwtConfig {
        JwtConfig {
            secret_key: SecretString::new(SECRET.to_string()),
            issuer: "identity-service".to_string(),
            audience: "platform-clients".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 30,
        }
    }

    fn service_with(clock: Arc<dyn Clock>) -> (TokenService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let service = TokenService::new(&jwt_config(), store.clone(), clock).unwrap();
        (service, store)
    }

    fn service() -> (TokenService, Arc<InMemoryStore>) {
        service_with(Arc::new(SystemClock))
    }

    fn codes(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = jwt_config();
        config.secret_key = SecretString::new("short".to_string());
        let result = TokenService::new(&config, Arc::new(InMemoryStore::new()), Arc::new(SystemClock));
        assert!(matches!(result, Err(ServiceError::InvalidArgument(_))));
    }

    #[test]
    fn test_access_token_claims() {
        let (service, _) = service();
        let user_id = Uuid::new_v4();
        let mut extra = BTreeMap::new();
        extra.insert("email".to_string(), "admin@platform.local".to_string());

        let token = service
            .generate_access_token(
                user_id,
                UserType::SystemAdmin,
                &codes(&["school.manage", "system.admin"]),
                &extra,
            )
            .unwrap();
        let claims = service.validate_access_token(&token).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.user_type, "SystemAdmin");
        assert_eq!(claims.iss, "identity-service");
        assert_eq!(claims.aud, "platform-clients");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
        assert_eq!(claims.nbf, claims.iat);
        assert_eq!(claims.permissions(), codes(&["school.manage", "system.admin"]));
        assert_eq!(claims.additional.get("email").map(String::as_str), Some("admin@platform.local"));
    }

    #[test]
    fn test_permission_claim_shapes() {
        let (service, _) = service();
        let user_id = Uuid::new_v4();
        let extra = BTreeMap::new();

        let none = service
            .generate_access_token(user_id, UserType::Parent, &[], &extra)
            .unwrap();
        let claims = service.validate_access_token(&none).unwrap();
        assert!(claims.permission.is_none());
        assert!(claims.permissions().is_empty());

        let one = service
            .generate_access_token(user_id, UserType::Parent, &codes(&["grades.read"]), &extra)
            .unwrap();
        let claims = service.validate_access_token(&one).unwrap();
        assert_eq!(claims.permission, Some(ClaimValues::One("grades.read".to_string())));
    }

    #[test]
    fn test_reserved_claim_rejected() {
        let (service, _) = service();
        let mut extra = BTreeMap::new();
        extra.insert("sub".to_string(), "someone-else".to_string());

        let result = service.generate_access_token(Uuid::new_v4(), UserType::Teacher, &[], &extra);
        assert!(matches!(result, Err(ServiceError::InvalidArgument(_))));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let (service, _) = service();
        let token = service
            .generate_access_token(Uuid::new_v4(), UserType::Teacher, &[], &BTreeMap::new())
            .unwrap();
        let tampered = format!("{}x", token);

        let result = service.validate_access_token(&tampered);
        assert!(matches!(
            result,
            Err(ServiceError::AuthenticationFailed(AuthFailure::AccessTokenInvalid))
        ));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let (service, store) = service();
        let mut other_config = jwt_config();
        other_config.audience = "someone-else".to_string();
        let other = TokenService::new(&other_config, store, Arc::new(SystemClock)).unwrap();

        let token = other
            .generate_access_token(Uuid::new_v4(), UserType::Teacher, &[], &BTreeMap::new())
            .unwrap();
        assert!(service.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_token_lifetime_follows_clock() {
        let clock = Arc::new(FixedClock::new(Utc::now() - Duration::days(365)));
        let (service, _) = service_with(clock.clone());

        let token = service
            .generate_access_token(Uuid::new_v4(), UserType::Teacher, &[], &BTreeMap::new())
            .unwrap();
        assert!(service.validate_access_token(&token).is_ok());

        clock.advance(Duration::minutes(15) - Duration::seconds(1));
        assert!(service.validate_access_token(&token).is_ok());

        clock.advance(Duration::seconds(1));
        assert!(service.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_token_not_yet_valid_rejected() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let (service, _) = service_with(clock.clone());

        let token = service
            .generate_access_token(Uuid::new_v4(), UserType::Teacher, &[], &BTreeMap::new())
            .unwrap();
        clock.advance(-Duration::seconds(1));

        assert!(matches!(
            service.validate_access_token(&token),
            Err(ServiceError::AuthenticationFailed(AuthFailure::AccessTokenInvalid))
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_lifecycle() {
        let (service, store) = service();
        let user_id = Uuid::new_v4();

        let secret = service
            .generate_refresh_token(user_id, Some("10.0.0.1"), Some("test-agent"))
            .await
            .unwrap();
        assert_eq!(STANDARD.decode(&secret).unwrap().len(), REFRESH_TOKEN_BYTES);

        let records = store.refresh_tokens_for(user_id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].token_hash, RefreshToken::hash_token(&secret));
        assert_ne!(records[0].token_hash, secret);

        assert!(service.validate_refresh_token(&secret, user_id).await.unwrap());
        assert!(!service.validate_refresh_token(&secret, Uuid::new_v4()).await.unwrap());

        let revoked = service.revoke_refresh_token(&secret, "logout").await.unwrap();
        assert!(revoked.is_some());
        assert!(!service.validate_refresh_token(&secret, user_id).await.unwrap());

        // Second revocation keeps the first reason
        let again = service.revoke_refresh_token(&secret, "admin").await.unwrap();
        assert!(again.is_none());
        assert_eq!(
            store.refresh_tokens_for(user_id)[0].revoked_reason.as_deref(),
            Some("logout")
        );
    }

    #[tokio::test]
    async fn test_refresh_token_expires() {
        let start = Utc::now();
        let clock = Arc::new(FixedClock::new(start));
        let (service, _) = service_with(clock.clone());
        let user_id = Uuid::new_v4();

        let secret = service.generate_refresh_token(user_id, None, None).await.unwrap();
        clock.advance(Duration::days(30));

        assert!(!service.validate_refresh_token(&secret, user_id).await.unwrap());
        assert!(matches!(
            service.find_active_refresh_token(&secret).await,
            Err(ServiceError::AuthenticationFailed(AuthFailure::RefreshTokenInactive))
        ));
    }

    #[tokio::test]
    async fn test_revoke_unknown_token_is_noop() {
        let (service, _) = service();
        assert!(service
            .revoke_refresh_token("not-a-real-token", "logout")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rotation_rejects_reuse() {
        let (service, _) = service();
        let user_id = Uuid::new_v4();
        let secret = service.generate_refresh_token(user_id, None, None).await.unwrap();

        let record = service.find_active_refresh_token(&secret).await.unwrap();
        let rotated = service.rotate_refresh_token(&record, None, None).await.unwrap();
        assert_eq!(rotated.previous_token_id, record.token_id);
        assert!(service.validate_refresh_token(&rotated.secret, user_id).await.unwrap());

        assert!(matches!(
            service.find_active_refresh_token(&secret).await,
            Err(ServiceError::AuthenticationFailed(AuthFailure::RefreshTokenReused))
        ));
        // Stale record from before the first rotation
        assert!(matches!(
            service.rotate_refresh_token(&record, None, None).await,
            Err(ServiceError::AuthenticationFailed(AuthFailure::RefreshTokenReused))
        ));
    }
}
