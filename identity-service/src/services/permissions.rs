use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use super::error::ServiceError;
use crate::store::IdentityStore;

/// Resolves the permission codes granted to a user through active
/// memberships and their roles.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn IdentityStore>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Distinct permission codes across all active memberships, sorted.
    pub async fn resolve_permissions(&self, user_id: Uuid) -> Result<BTreeSet<String>, ServiceError> {
        let role_ids: BTreeSet<Uuid> = self
            .store
            .find_active_memberships_by_user_id(user_id)
            .await?
            .into_iter()
            .filter(|m| m.is_active())
            .map(|m| m.role_id)
            .collect();

        self.codes_for_roles(role_ids).await
    }

    /// Like [`Self::resolve_permissions`], limited to memberships in
    /// `school_id` plus platform-wide memberships.
    pub async fn resolve_permissions_in_school(
        &self,
        user_id: Uuid,
        school_id: Uuid,
    ) -> Result<BTreeSet<String>, ServiceError> {
        let role_ids: BTreeSet<Uuid> = self
            .store
            .find_active_memberships_by_user_id(user_id)
            .await?
            .into_iter()
            .filter(|m| m.is_active() && m.applies_to_school(school_id))
            .map(|m| m.role_id)
            .collect();

        self.codes_for_roles(role_ids).await
    }

    async fn codes_for_roles(&self, role_ids: BTreeSet<Uuid>) -> Result<BTreeSet<String>, ServiceError> {
        if role_ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let role_ids: Vec<Uuid> = role_ids.into_iter().collect();
        let permission_ids: Vec<Uuid> = self
            .store
            .find_role_permissions_by_role_ids(&role_ids)
            .await?
            .into_iter()
            .map(|link| link.permission_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if permission_ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let codes = self
            .store
            .find_permissions_by_ids(&permission_ids)
            .await?
            .into_iter()
            .map(|p| p.perm_code)
            .collect();

        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Permission, Role, RolePermission, User, UserSchoolMembership, UserType};
    use crate::store::InMemoryStore;
    use chrono::Utc;

    struct Fixture {
        store: Arc<InMemoryStore>,
        resolver: PermissionResolver,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let resolver = PermissionResolver::new(store.clone());
            Self { store, resolver }
        }

        async fn role(&self, code: &str, perms: &[&str]) -> Role {
            let now = Utc::now();
            let role = Role::new(code, code, now).unwrap();
            self.store.insert_role(&role).await.unwrap();
            for perm in perms {
                let permission = match self.store.find_permission_by_code(perm).await.unwrap() {
                    Some(p) => p,
                    None => {
                        let p = Permission::new(perm, perm, now).unwrap();
                        self.store.insert_permission(&p).await.unwrap();
                        p
                    }
                };
                self.store
                    .insert_role_permission(&RolePermission::new(role.role_id, permission.permission_id, now))
                    .await
                    .unwrap();
            }
            role
        }

        async fn grant(&self, user_id: Uuid, school_id: Option<Uuid>, role: &Role) -> UserSchoolMembership {
            let membership = UserSchoolMembership::new(user_id, school_id, role.role_id, Utc::now());
            self.store.insert_membership(&membership).await.unwrap();
            membership
        }
    }

    #[tokio::test]
    async fn test_overlapping_roles_deduplicated() {
        let fx = Fixture::new();
        let user = User::new(UserType::Teacher, Utc::now());
        let teacher = fx.role("Teacher", &["grades.read", "grades.write"]).await;
        let homeroom = fx.role("HomeroomTeacher", &["grades.read", "attendance.write"]).await;
        let school = Uuid::new_v4();
        fx.grant(user.user_id, Some(school), &teacher).await;
        fx.grant(user.user_id, Some(school), &homeroom).await;

        let perms = fx.resolver.resolve_permissions(user.user_id).await.unwrap();
        let perms: Vec<&str> = perms.iter().map(String::as_str).collect();
        assert_eq!(perms, vec!["attendance.write", "grades.read", "grades.write"]);
    }

    #[tokio::test]
    async fn test_no_memberships_means_no_permissions() {
        let fx = Fixture::new();
        let perms = fx.resolver.resolve_permissions(Uuid::new_v4()).await.unwrap();
        assert!(perms.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_membership_ignored() {
        let fx = Fixture::new();
        let user_id = Uuid::new_v4();
        let role = fx.role("Teacher", &["grades.read"]).await;

        let mut membership = UserSchoolMembership::new(user_id, Some(Uuid::new_v4()), role.role_id, Utc::now());
        membership.disable(Utc::now());
        fx.store.insert_membership(&membership).await.unwrap();

        let perms = fx.resolver.resolve_permissions(user_id).await.unwrap();
        assert!(perms.is_empty());
    }

    #[tokio::test]
    async fn test_school_scope_includes_platform_roles() {
        let fx = Fixture::new();
        let user_id = Uuid::new_v4();
        let school_a = Uuid::new_v4();
        let school_b = Uuid::new_v4();
        let admin = fx.role("SystemAdmin", &["system.admin"]).await;
        let teacher = fx.role("Teacher", &["grades.read"]).await;
        let principal = fx.role("Principal", &["school.manage"]).await;
        fx.grant(user_id, None, &admin).await;
        fx.grant(user_id, Some(school_a), &teacher).await;
        fx.grant(user_id, Some(school_b), &principal).await;

        let perms = fx
            .resolver
            .resolve_permissions_in_school(user_id, school_a)
            .await
            .unwrap();
        let perms: Vec<&str> = perms.iter().map(String::as_str).collect();
        assert_eq!(perms, vec!["grades.read", "system.admin"]);
    }
}
