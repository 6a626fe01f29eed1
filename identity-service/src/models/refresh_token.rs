use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Column widths of the client metadata.
pub const MAX_IP_ADDRESS_CHARS: usize = 64;
pub const MAX_USER_AGENT_CHARS: usize = 512;

/// Refresh token record. Only the SHA-256 digest of the secret is stored;
/// records are revoked, never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    /// Unique identifier for the refresh token record
    pub token_id: Uuid,

    /// User ID this token belongs to
    pub user_id: Uuid,

    /// Base64 SHA-256 digest of the token secret
    pub token_hash: String,

    pub issued_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,

    pub revoked_utc: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,

    /// Set when the token was revoked by rotation
    pub replaced_by_token_id: Option<Uuid>,

    /// Requesting client metadata
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,

    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl RefreshToken {
    /// Create a new refresh token record for an already hashed secret.
    pub fn new(
        user_id: Uuid,
        token_hash: String,
        issued_utc: DateTime<Utc>,
        expires_in_days: i64,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            user_id,
            token_hash,
            issued_utc,
            expires_utc: issued_utc + Duration::days(expires_in_days),
            revoked_utc: None,
            revoked_reason: None,
            replaced_by_token_id: None,
            ip_address: ip_address.map(|ip| truncate_chars(ip, MAX_IP_ADDRESS_CHARS)),
            user_agent: user_agent.map(|ua| truncate_chars(ua, MAX_USER_AGENT_CHARS)),
            created_utc: issued_utc,
            updated_utc: issued_utc,
        }
    }

    /// Hash a token secret using SHA-256.
    pub fn hash_token(token: &str) -> String {
        STANDARD.encode(Sha256::digest(token.as_bytes()))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_utc
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }

    /// Not expired and not revoked.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired_at(now)
    }

    pub fn revoke(&mut self, reason: &str, now: DateTime<Utc>, replaced_by: Option<Uuid>) {
        self.revoked_utc = Some(now);
        self.revoked_reason = Some(reason.to_string());
        self.replaced_by_token_id = replaced_by;
        self.updated_utc = now;
    }
}

/// Cut `value` to at most `max` characters, never splitting one.
fn truncate_chars(mut value: String, max: usize) -> String {
    if let Some((idx, _)) = value.char_indices().nth(max) {
        value.truncate(idx);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_at(now: DateTime<Utc>) -> RefreshToken {
        RefreshToken::new(
            Uuid::new_v4(),
            RefreshToken::hash_token("token_abc"),
            now,
            30,
            Some("10.0.0.1".to_string()),
            Some("test-agent".to_string()),
        )
    }

    #[test]
    fn test_refresh_token_creation() {
        let now = Utc::now();
        let token = token_at(now);

        assert_ne!(token.token_hash, "token_abc");
        assert_eq!(token.expires_utc, now + Duration::days(30));
        assert!(!token.is_revoked());
        assert!(token.is_active_at(now));
    }

    #[test]
    fn test_hash_is_deterministic_sha256() {
        // SHA-256("abc"), base64 encoded
        assert_eq!(
            RefreshToken::hash_token("abc"),
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
    }

    #[test]
    fn test_refresh_token_expiry() {
        let now = Utc::now();
        let token = token_at(now);

        assert!(!token.is_expired_at(now + Duration::days(29)));
        assert!(token.is_expired_at(now + Duration::days(30)));
        assert!(!token.is_active_at(now + Duration::days(31)));
    }

    #[test]
    fn test_refresh_token_revocation() {
        let now = Utc::now();
        let mut token = token_at(now);
        let successor = Uuid::new_v4();

        token.revoke("rotated", now, Some(successor));
        assert!(token.is_revoked());
        assert!(!token.is_active_at(now));
        assert_eq!(token.revoked_reason.as_deref(), Some("rotated"));
        assert_eq!(token.replaced_by_token_id, Some(successor));
    }

    #[test]
    fn test_client_metadata_fits_columns() {
        let now = Utc::now();
        let agent = "é".repeat(MAX_USER_AGENT_CHARS + 10);
        let token = RefreshToken::new(
            Uuid::new_v4(),
            RefreshToken::hash_token("token_abc"),
            now,
            30,
            Some("1".repeat(100)),
            Some(agent),
        );

        let stored = token.user_agent.unwrap();
        assert_eq!(stored.chars().count(), MAX_USER_AGENT_CHARS);
        assert!(stored.chars().all(|c| c == 'é'));
        assert_eq!(token.ip_address.unwrap().len(), MAX_IP_ADDRESS_CHARS);

        let short = token_at(now);
        assert_eq!(short.user_agent.as_deref(), Some("test-agent"));
    }
}
