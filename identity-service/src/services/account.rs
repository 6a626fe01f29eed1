use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::clock::Clock;
use super::error::ServiceError;
use super::events::EventBus;
use crate::models::{ModelError, User, UserStatusChange};
use crate::store::IdentityStore;

/// User status administration.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn IdentityStore>,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(store: Arc<dyn IdentityStore>, events: EventBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            events,
            clock,
        }
    }

    pub async fn activate(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.transition(user_id, |user, now| Ok(user.activate(now))).await
    }

    /// Fails with `StateConflict` for system administrators.
    pub async fn disable(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.transition(user_id, |user, now| user.disable(now)).await
    }

    pub async fn lock(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.transition(user_id, |user, now| Ok(user.lock(now))).await
    }

    /// Fails with `StateConflict` unless the user is locked.
    pub async fn unlock(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.transition(user_id, |user, now| user.unlock(now).map(Some))
            .await
    }

    async fn transition<F>(&self, user_id: Uuid, apply: F) -> Result<User, ServiceError>
    where
        F: FnOnce(&mut User, DateTime<Utc>) -> Result<Option<UserStatusChange>, ModelError> + Send,
    {
        let mut user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;

        let change = match apply(&mut user, self.clock.now()) {
            Ok(change) => change,
            Err(e) => {
                tracing::warn!(user_id = %user_id, status = %user.status, error = %e, "User status change rejected");
                return Err(e.into());
            }
        };

        // Same-status transitions are no-ops: nothing written, no event.
        if let Some(change) = change {
            self.store.update_user(&user).await?;
            tracing::info!(
                user_id = %user_id,
                from = %change.from,
                to = %change.to,
                "User status changed"
            );
            self.events.publish(change.into());
        }

        Ok(user)
    }
}
