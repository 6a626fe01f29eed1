//! Services layer for identity-service.
//!
//! Business logic for login, token issuance, permission resolution,
//! account status and startup seeding.

pub mod account;
pub mod auth;
pub mod clock;
pub mod error;
pub mod events;
pub mod jwt;
pub mod permissions;
pub mod seed;

pub use account::AccountService;
pub use auth::{
    AuthService, LoginCommand, LoginSession, RefreshCommand, SessionUser, TokenPair, EMAIL_CLAIM,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{AuthFailure, ServiceError};
pub use events::{spawn_audit_log, EventBus, IdentityEvent};
pub use jwt::{AccessTokenClaims, ClaimValues, RotatedRefreshToken, TokenService};
pub use permissions::PermissionResolver;
pub use seed::{SeedReport, Seeder};
