//! In-process domain events.
//!
//! Publishing never blocks and never fails the operation that raised the
//! event: with no subscribers the event is simply dropped.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{UserStatus, UserStatusChange, UserType};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    UserCreated {
        user_id: Uuid,
        user_type: UserType,
        occurred_utc: DateTime<Utc>,
    },
    UserStatusChanged {
        user_id: Uuid,
        from: UserStatus,
        to: UserStatus,
        occurred_utc: DateTime<Utc>,
    },
    LoginSucceeded {
        user_id: Uuid,
        occurred_utc: DateTime<Utc>,
    },
    RefreshTokenRotated {
        user_id: Uuid,
        previous_token_id: Uuid,
        token_id: Uuid,
        occurred_utc: DateTime<Utc>,
    },
    RefreshTokenRevoked {
        user_id: Uuid,
        token_id: Uuid,
        reason: String,
        occurred_utc: DateTime<Utc>,
    },
}

impl IdentityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            IdentityEvent::UserCreated { .. } => "user_created",
            IdentityEvent::UserStatusChanged { .. } => "user_status_changed",
            IdentityEvent::LoginSucceeded { .. } => "login_succeeded",
            IdentityEvent::RefreshTokenRotated { .. } => "refresh_token_rotated",
            IdentityEvent::RefreshTokenRevoked { .. } => "refresh_token_revoked",
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            IdentityEvent::UserCreated { user_id, .. }
            | IdentityEvent::UserStatusChanged { user_id, .. }
            | IdentityEvent::LoginSucceeded { user_id, .. }
            | IdentityEvent::RefreshTokenRotated { user_id, .. }
            | IdentityEvent::RefreshTokenRevoked { user_id, .. } => *user_id,
        }
    }
}

impl From<UserStatusChange> for IdentityEvent {
    fn from(change: UserStatusChange) -> Self {
        IdentityEvent::UserStatusChanged {
            user_id: change.user_id,
            from: change.from,
            to: change.to,
            occurred_utc: change.occurred_utc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<IdentityEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: IdentityEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => tracing::debug!(event = name, receivers, "Event published"),
            Err(_) => tracing::trace!(event = name, "Event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.sender.subscribe()
    }
}

/// Write every event on `bus` to the `audit` log target until the bus is
/// dropped.
pub fn spawn_audit_log(bus: &EventBus) -> JoinHandle<u64> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        let mut logged = 0;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    tracing::info!(
                        target: "audit",
                        event = event.name(),
                        user_id = %event.user_id(),
                        "Identity event"
                    );
                    logged += 1;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "audit", skipped, "Audit log fell behind, events skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        logged
    })
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
