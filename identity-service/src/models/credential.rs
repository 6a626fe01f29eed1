//! Credential model - the single password credential of a user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaMode {
    None,
    PasswordOnly,
    PasswordAndOtp,
    OtpOnly,
    PasswordAndTotp,
}

impl MfaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaMode::None => "none",
            MfaMode::PasswordOnly => "password_only",
            MfaMode::PasswordAndOtp => "password_and_otp",
            MfaMode::OtpOnly => "otp_only",
            MfaMode::PasswordAndTotp => "password_and_totp",
        }
    }
}

impl std::str::FromStr for MfaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(MfaMode::None),
            "password_only" => Ok(MfaMode::PasswordOnly),
            "password_and_otp" => Ok(MfaMode::PasswordAndOtp),
            "otp_only" => Ok(MfaMode::OtpOnly),
            "password_and_totp" => Ok(MfaMode::PasswordAndTotp),
            _ => Err(format!("Invalid MFA mode: {}", s)),
        }
    }
}

/// Credential entity (1:1 with a user).
///
/// `password_hash` is the opaque salt-plus-key blob produced by
/// [`crate::utils::PasswordHasher`]; `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub credential_id: Uuid,
    pub user_id: Uuid,
    pub password_hash: Vec<u8>,
    pub mfa_mode: MfaMode,
    pub must_change_password: bool,
    pub last_password_changed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        user_id: Uuid,
        password_hash: Vec<u8>,
        mfa_mode: MfaMode,
        must_change_password: bool,
        now: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        if password_hash.is_empty() {
            return Err(ModelError::EmptyField("Password hash"));
        }

        Ok(Self {
            credential_id: Uuid::new_v4(),
            user_id,
            password_hash,
            mfa_mode,
            must_change_password,
            last_password_changed_utc: None,
            created_utc: now,
            updated_utc: now,
        })
    }

    pub fn update_password(&mut self, password_hash: Vec<u8>, now: DateTime<Utc>) -> Result<(), ModelError> {
        if password_hash.is_empty() {
            return Err(ModelError::EmptyField("Password hash"));
        }
        self.password_hash = password_hash;
        self.last_password_changed_utc = Some(now);
        self.must_change_password = false;
        self.updated_utc = now;
        Ok(())
    }

    pub fn require_password_change(&mut self, now: DateTime<Utc>) {
        self.must_change_password = true;
        self.updated_utc = now;
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("credential_id", &self.credential_id)
            .field("user_id", &self.user_id)
            .field("password_hash", &"<redacted>")
            .field("mfa_mode", &self.mfa_mode)
            .field("must_change_password", &self.must_change_password)
            .field("last_password_changed_utc", &self.last_password_changed_utc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_hash() {
        let credential = Credential::new(
            Uuid::new_v4(),
            vec![0xAB; 48],
            MfaMode::PasswordOnly,
            false,
            Utc::now(),
        )
        .unwrap();
        let printed = format!("{:?}", credential);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("[171"));
    }

    #[test]
    fn test_update_password_clears_change_flag() {
        let now = Utc::now();
        let mut credential =
            Credential::new(Uuid::new_v4(), vec![1; 48], MfaMode::PasswordAndOtp, true, now).unwrap();

        credential.update_password(vec![2; 48], now).unwrap();
        assert!(!credential.must_change_password);
        assert_eq!(credential.last_password_changed_utc, Some(now));

        credential.require_password_change(now);
        assert!(credential.must_change_password);
    }

    #[test]
    fn test_empty_hash_rejected() {
        let result = Credential::new(Uuid::new_v4(), Vec::new(), MfaMode::None, false, Utc::now());
        assert!(result.is_err());
    }
}
