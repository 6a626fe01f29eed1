pub mod contact;
pub mod credential;
pub mod error;
pub mod membership;
pub mod permission;
pub mod refresh_token;
pub mod role;
pub mod user;

pub use contact::{Contact, ContactKind};
pub use credential::{Credential, MfaMode};
pub use error::ModelError;
pub use membership::{MembershipStatus, UserSchoolMembership};
pub use permission::Permission;
pub use refresh_token::RefreshToken;
pub use role::{Role, RolePermission};
pub use user::{User, UserStatus, UserStatusChange, UserType};
