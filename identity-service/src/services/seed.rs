//! Startup seeding of the permission catalog, the role catalog and the
//! first system administrator. Every step is idempotent.

use secrecy::ExposeSecret;
use std::sync::Arc;
use uuid::Uuid;

use super::clock::Clock;
use super::error::ServiceError;
use super::events::{EventBus, IdentityEvent};
use crate::config::SeedConfig;
use crate::models::{
    Contact, ContactKind, Credential, MfaMode, Permission, Role, RolePermission, User,
    UserSchoolMembership, UserType,
};
use crate::store::{IdentityStore, NewAccount};
use crate::utils::{Password, PasswordHasher};

pub const SYSTEM_ADMIN_ROLE: &str = "SystemAdmin";

pub struct RoleSeed {
    pub code: &'static str,
    pub description: &'static str,
    pub permissions: &'static [&'static str],
}

pub const PERMISSIONS: &[(&str, &str)] = &[
    ("school.manage", "Create schools, assign principals"),
    ("school.read", "View school information"),
    ("school.update", "Update school information"),
    ("staff.invite", "Invite school staff"),
    ("staff.read", "View staff profiles"),
    ("staff.manage", "Manage staff profiles and permissions"),
    ("student.read", "View student profiles"),
    ("student.manage", "Create/modify student profiles"),
    ("student.delete", "Delete student profiles"),
    ("enrollment.read", "View enrollments"),
    ("enrollment.manage", "Create/modify enrollments"),
    ("finance.read", "View fee balances and transactions"),
    ("finance.post", "Record payments and fees"),
    ("finance.manage", "Manage fee structures"),
    ("grades.read", "View grades"),
    ("grades.post", "Post/modify grades"),
    ("grades.approve", "Approve and publish grades"),
    ("attendance.read", "View attendance records"),
    ("attendance.post", "Mark attendance"),
    ("class.read", "View class information"),
    ("class.manage", "Create/modify classes"),
    ("transport.read", "View transport routes and logs"),
    ("transport.manage", "Manage transport routes and assignments"),
    ("communication.send", "Send notifications and messages"),
    ("communication.read", "View communication history"),
    ("reports.view", "View system reports"),
    ("reports.generate", "Generate custom reports"),
    ("user.read", "View all user accounts"),
    ("user.manage", "Create/modify user accounts"),
    ("user.delete", "Delete user accounts"),
    ("users.create", "Create new user accounts"),
    ("users.read", "View user accounts"),
    ("users.update", "Update user accounts"),
    ("users.delete", "Delete user accounts"),
    ("system.admin", "Full system administration access"),
    ("audit.read", "View audit logs"),
];

pub const ROLES: &[RoleSeed] = &[
    RoleSeed {
        code: SYSTEM_ADMIN_ROLE,
        description: "Platform super administrator with full access",
        permissions: &[
            "system.admin",
            "school.manage",
            "school.read",
            "school.update",
            "staff.invite",
            "staff.read",
            "staff.manage",
            "student.read",
            "student.manage",
            "student.delete",
            "enrollment.read",
            "enrollment.manage",
            "finance.read",
            "finance.post",
            "finance.manage",
            "grades.read",
            "grades.post",
            "grades.approve",
            "attendance.read",
            "attendance.post",
            "class.read",
            "class.manage",
            "transport.read",
            "transport.manage",
            "communication.send",
            "communication.read",
            "reports.view",
            "reports.generate",
            "user.read",
            "user.manage",
            "user.delete",
            "audit.read",
        ],
    },
    RoleSeed {
        code: "Principal",
        description: "School principal with full school management access",
        permissions: &[
            "school.read",
            "school.update",
            "staff.invite",
            "staff.read",
            "staff.manage",
            "student.read",
            "student.manage",
            "enrollment.read",
            "enrollment.manage",
            "finance.read",
            "finance.manage",
            "grades.read",
            "grades.approve",
            "attendance.read",
            "class.read",
            "class.manage",
            "transport.read",
            "transport.manage",
            "communication.send",
            "communication.read",
            "reports.view",
            "reports.generate",
        ],
    },
    RoleSeed {
        code: "DeputyPrincipal",
        description: "Deputy principal with extended school management access",
        permissions: &[
            "school.read",
            "staff.invite",
            "staff.read",
            "student.read",
            "student.manage",
            "enrollment.read",
            "enrollment.manage",
            "finance.read",
            "grades.read",
            "grades.approve",
            "attendance.read",
            "class.read",
            "class.manage",
            "communication.send",
            "communication.read",
            "reports.view",
            "reports.generate",
        ],
    },
    RoleSeed {
        code: "Teacher",
        description: "Teacher with classroom management access",
        permissions: &[
            "student.read",
            "enrollment.read",
            "grades.read",
            "grades.post",
            "attendance.read",
            "attendance.post",
            "class.read",
            "communication.send",
            "communication.read",
            "reports.view",
        ],
    },
    RoleSeed {
        code: "Accountant",
        description: "Finance/Accountant with financial management access",
        permissions: &[
            "student.read",
            "finance.read",
            "finance.post",
            "finance.manage",
            "reports.view",
            "reports.generate",
        ],
    },
    RoleSeed {
        code: "InfoDesk",
        description: "Secretarial/Information Desk with administrative support access",
        permissions: &[
            "school.read",
            "student.read",
            "enrollment.read",
            "communication.send",
            "communication.read",
            "reports.view",
        ],
    },
    RoleSeed {
        code: "TransportManager",
        description: "Transport manager with transport operations access",
        permissions: &[
            "student.read",
            "transport.read",
            "transport.manage",
            "communication.send",
            "reports.view",
        ],
    },
    RoleSeed {
        code: "Student",
        description: "Student with limited read-only access to own data",
        permissions: &["grades.read", "attendance.read", "class.read", "communication.read"],
    },
    RoleSeed {
        code: "Parent",
        description: "Parent/Guardian with read-only access to child's data",
        permissions: &[
            "student.read",
            "enrollment.read",
            "grades.read",
            "finance.read",
            "attendance.read",
            "communication.read",
        ],
    },
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub role_permissions_created: usize,
    pub system_admin_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct Seeder {
    store: Arc<dyn IdentityStore>,
    hasher: PasswordHasher,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl Seeder {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        hasher: PasswordHasher,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            hasher,
            events,
            clock,
        }
    }

    /// Permissions, then roles, then the system administrator.
    pub async fn seed_all(&self, config: &SeedConfig) -> Result<SeedReport, ServiceError> {
        let mut report = SeedReport {
            permissions_created: self.seed_permissions().await?,
            ..SeedReport::default()
        };

        let (roles, links) = self.seed_roles().await?;
        report.roles_created = roles;
        report.role_permissions_created = links;
        report.system_admin_id = self.seed_system_admin(config).await?;

        tracing::info!(
            permissions_created = report.permissions_created,
            roles_created = report.roles_created,
            role_permissions_created = report.role_permissions_created,
            system_admin_created = report.system_admin_id.is_some(),
            "Seeding completed"
        );
        Ok(report)
    }

    pub async fn seed_permissions(&self) -> Result<usize, ServiceError> {
        let now = self.clock.now();
        let mut created = 0;

        for (code, description) in PERMISSIONS {
            if self.store.find_permission_by_code(code).await?.is_some() {
                continue;
            }
            let permission = Permission::new(code, description, now)?;
            self.store.insert_permission(&permission).await?;
            tracing::debug!(perm_code = code, "Created permission");
            created += 1;
        }

        Ok(created)
    }

    /// Returns `(roles created, role-permission links created)`.
    pub async fn seed_roles(&self) -> Result<(usize, usize), ServiceError> {
        let now = self.clock.now();
        let mut roles_created = 0;
        let mut links_created = 0;

        for seed in ROLES {
            let role = match self.store.find_role_by_code(seed.code).await? {
                Some(role) => role,
                None => {
                    let role = Role::new(seed.code, seed.description, now)?;
                    self.store.insert_role(&role).await?;
                    tracing::info!(role_code = seed.code, "Created role");
                    roles_created += 1;
                    role
                }
            };

            for code in seed.permissions {
                let Some(permission) = self.store.find_permission_by_code(code).await? else {
                    tracing::warn!(perm_code = code, role_code = seed.code, "Permission not found, skipping");
                    continue;
                };
                let link = RolePermission::new(role.role_id, permission.permission_id, now);
                if self.store.insert_role_permission(&link).await? {
                    links_created += 1;
                }
            }
        }

        Ok((roles_created, links_created))
    }

    /// Create the first system administrator unless one already exists.
    pub async fn seed_system_admin(&self, config: &SeedConfig) -> Result<Option<Uuid>, ServiceError> {
        if self.store.any_user_of_type(UserType::SystemAdmin).await? {
            tracing::info!("System admin already exists, skipping");
            return Ok(None);
        }

        let role = self
            .store
            .find_role_by_code(SYSTEM_ADMIN_ROLE)
            .await?
            .ok_or_else(|| {
                ServiceError::StateConflict(format!(
                    "{} role not found, seed roles first",
                    SYSTEM_ADMIN_ROLE
                ))
            })?;

        let password_hash = self
            .hasher
            .hash_password_async(Password::new(
                config.admin_temp_password.expose_secret().clone(),
            ))
            .await?;

        let now = self.clock.now();
        let mut user = User::new(UserType::SystemAdmin, now);
        let activation = user.activate(now);

        let mut contact = Contact::new(user.user_id, ContactKind::Email, &config.admin_email, true, now)?;
        contact.mark_verified(now);

        let credential = Credential::new(
            user.user_id,
            password_hash,
            MfaMode::PasswordAndOtp,
            true,
            now,
        )?;
        let membership = UserSchoolMembership::new(user.user_id, None, role.role_id, now);

        self.store
            .insert_account(NewAccount {
                user: &user,
                contact: &contact,
                credential: &credential,
                membership: Some(&membership),
            })
            .await?;

        self.events.publish(IdentityEvent::UserCreated {
            user_id: user.user_id,
            user_type: user.user_type,
            occurred_utc: now,
        });
        if let Some(change) = activation {
            self.events.publish(change.into());
        }

        tracing::warn!(
            user_id = %user.user_id,
            email = %contact.value,
            "Created system admin with a temporary password; it must be changed on first login"
        );
        Ok(Some(user.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PasswordHashingConfig;
    use crate::services::clock::SystemClock;
    use crate::services::permissions::PermissionResolver;
    use crate::store::InMemoryStore;
    use secrecy::SecretString;
    use std::collections::HashSet;

    fn seeder() -> (Seeder, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let hasher = PasswordHasher::new(&PasswordHashingConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();
        let seeder = Seeder::new(store.clone(), hasher, EventBus::default(), Arc::new(SystemClock));
        (seeder, store)
    }

    fn seed_config() -> SeedConfig {
        SeedConfig {
            admin_email: "Admin@Platform.local".to_string(),
            admin_temp_password: SecretString::new("ChangeMe123!".to_string()),
        }
    }

    #[test]
    fn test_catalog_is_consistent() {
        let codes: HashSet<&str> = PERMISSIONS.iter().map(|(code, _)| *code).collect();
        assert_eq!(codes.len(), PERMISSIONS.len());
        for role in ROLES {
            for perm in role.permissions {
                assert!(codes.contains(perm), "{} references unknown {}", role.code, perm);
            }
        }
    }

    #[tokio::test]
    async fn test_seed_all_is_idempotent() {
        let (seeder, _) = seeder();

        let first = seeder.seed_all(&seed_config()).await.unwrap();
        assert_eq!(first.permissions_created, PERMISSIONS.len());
        assert_eq!(first.roles_created, ROLES.len());
        assert!(first.system_admin_id.is_some());

        let second = seeder.seed_all(&seed_config()).await.unwrap();
        assert_eq!(second, SeedReport::default());
    }

    #[tokio::test]
    async fn test_system_admin_shape() {
        let (seeder, store) = seeder();
        let report = seeder.seed_all(&seed_config()).await.unwrap();
        let admin_id = report.system_admin_id.unwrap();

        let user = store.find_user_by_id(admin_id).await.unwrap().unwrap();
        assert!(user.is_active());

        let contact = store
            .find_contact_by_email("admin@platform.local")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contact.user_id, admin_id);
        assert!(contact.is_verified && contact.is_primary);

        let credential = store.find_credential_by_user_id(admin_id).await.unwrap().unwrap();
        assert!(credential.must_change_password);
        assert_eq!(credential.mfa_mode, MfaMode::PasswordAndOtp);
        assert!(seeder
            .hasher
            .verify_password(&Password::from("ChangeMe123!"), &credential.password_hash)
            .unwrap());

        let perms = PermissionResolver::new(store.clone())
            .resolve_permissions(admin_id)
            .await
            .unwrap();
        assert!(perms.contains("system.admin"));
        assert!(perms.contains("audit.read"));
    }

    #[tokio::test]
    async fn test_failed_admin_write_can_be_retried() {
        let (seeder, store) = seeder();
        seeder.seed_permissions().await.unwrap();
        seeder.seed_roles().await.unwrap();

        store.set_account_writes_fail(true);
        let result = seeder.seed_system_admin(&seed_config()).await;
        assert!(matches!(result, Err(ServiceError::DependencyUnavailable(_))));
        assert!(!store.any_user_of_type(UserType::SystemAdmin).await.unwrap());
        assert!(store.find_contact_by_email("admin@platform.local").await.unwrap().is_none());

        store.set_account_writes_fail(false);
        let admin_id = seeder.seed_system_admin(&seed_config()).await.unwrap().unwrap();
        let credential = store.find_credential_by_user_id(admin_id).await.unwrap();
        assert!(credential.is_some());
    }

    #[tokio::test]
    async fn test_admin_requires_role() {
        let (seeder, _) = seeder();
        let result = seeder.seed_system_admin(&seed_config()).await;
        assert!(matches!(result, Err(ServiceError::StateConflict(_))));
    }
}
