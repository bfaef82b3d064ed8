//! Incident-ticketing notifications
//!
//! Notifications are sent after a write commits. A failed notification is
//! logged and never fails the write.

use async_trait::async_trait;
use steward_model::{EntityId, WriteResult};
use uuid::Uuid;

/// Mutation reported to the incident connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncidentEvent {
    /// Agent created, or its connector changed
    AgentRegistered {
        agent_id: EntityId,
        owner_id: Option<EntityId>,
        connector_id: Uuid,
    },
    /// Owner created, or its connector changed
    OwnerRegistered { owner_id: EntityId, connector_id: Uuid },
    AgentDeleted {
        agent_id: EntityId,
        override_pending_commands: bool,
        force: bool,
    },
}

impl IncidentEvent {
    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        match self {
            Self::AgentRegistered { agent_id, .. } | Self::AgentDeleted { agent_id, .. } => {
                *agent_id
            }
            Self::OwnerRegistered { owner_id, .. } => *owner_id,
        }
    }
}

#[async_trait]
pub trait IncidentNotifier: Send + Sync {
    async fn notify(&self, event: IncidentEvent) -> WriteResult<()>;
}

/// Notifier that only records events in the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl IncidentNotifier for LoggingNotifier {
    async fn notify(&self, event: IncidentEvent) -> WriteResult<()> {
        tracing::info!(?event, "incident notification");
        Ok(())
    }
}

/// Deliver `event`, swallowing failures
pub(crate) async fn deliver(notifier: &dyn IncidentNotifier, event: IncidentEvent) {
    let entity = event.entity_id();
    if let Err(error) = notifier.notify(event).await {
        tracing::warn!(%entity, %error, "incident notification failed");
    }
}
