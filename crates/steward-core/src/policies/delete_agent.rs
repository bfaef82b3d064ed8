//! Delete agent rules
//!
//! Beyond the connection and migration validators, an agent's production
//! configuration is frozen once Prod exists: only service admins, or an
//! update that moves Prod across protocol families during a migration,
//! may change it.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use steward_model::{
    AgentReadiness, ConflictKind, ConnectionDetail, ConnectionDetails, DeleteAgent, Entity,
    ProtocolFamily, ProtocolId, ReleaseState, WriteAction, WriteError, WriteResult,
};
use steward_store::Clock;
use steward_validation::connection::normalize;
use steward_validation::rules::{property_required, property_should_not_be_set};
use steward_validation::{ConnectionValidator, MigrationTable, MigrationValidator};
use uuid::Uuid;

use super::{embedded_owner_not_set, read_owners, reference_should_exist};
use crate::authorization::{AuthorizationGate, OwnerResolution};
use crate::config::WriterConfig;
use crate::incident::IncidentEvent;
use crate::readers::{EntityReader, Expand, Readers};
use crate::writer::{DeleteOptions, EntityPolicy, WriteContext, WriterServices};

const CONNECTION_DETAILS: &str = "connectionDetails";

pub struct DeleteAgentPolicy {
    readers: Readers,
    authorization: Arc<AuthorizationGate>,
    clock: Arc<dyn Clock>,
    connections: ConnectionValidator,
    migrations: MigrationValidator,
}

impl DeleteAgentPolicy {
    #[must_use]
    pub fn new(config: &WriterConfig, services: &WriterServices) -> Self {
        let connections = ConnectionValidator::new(config.delete_agent.clone());
        Self {
            readers: services.readers.clone(),
            authorization: services.authorization.clone(),
            clock: services.clock.clone(),
            migrations: MigrationValidator::new(MigrationTable::STANDARD, connections.clone()),
            connections,
        }
    }

    #[inline]
    #[must_use]
    pub fn connections(&self) -> &ConnectionValidator {
        &self.connections
    }

    #[inline]
    #[must_use]
    pub fn migrations(&self) -> &MigrationValidator {
        &self.migrations
    }

    /// Non-PreProd entries of `existing` and `incoming` must agree, both ways
    fn production_details_unchanged(existing: &DeleteAgent, incoming: &DeleteAgent) -> WriteResult<()> {
        let directions = [
            (&existing.connection_details, &incoming.connection_details),
            (&incoming.connection_details, &existing.connection_details),
        ];
        for (from, to) in directions {
            for (state, detail) in from {
                if *state == ReleaseState::PreProd {
                    continue;
                }
                let unchanged = to
                    .get(state)
                    .is_some_and(|other| same_connection(detail, other));
                if !unchanged {
                    return Err(WriteError::conflict(
                        ConflictKind::Immutable,
                        format!("{CONNECTION_DETAILS}[{state}]"),
                        None,
                        "connection details are immutable after Prod has been set",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Frozen-production checks for an update of an agent that has Prod
    async fn validate_production_update(
        &self,
        ctx: &WriteContext,
        incoming: &DeleteAgent,
        existing: &DeleteAgent,
    ) -> WriteResult<()> {
        let exempt = self.authorization.is_service_admin(&ctx.principal).await?
            || is_production_migration(existing, incoming);

        if !exempt {
            Self::production_details_unchanged(existing, incoming)?;

            let was_ready = prod_readiness(&existing.connection_details) == Some(AgentReadiness::ProdReady);
            let readiness = prod_readiness(&incoming.connection_details);
            if was_ready && readiness != Some(AgentReadiness::ProdReady) {
                return Err(WriteError::conflict(
                    ConflictKind::Immutable,
                    format!("{CONNECTION_DETAILS}[Prod].agentReadiness"),
                    readiness.map(|r| r.to_string()),
                    "agentReadiness cannot change once marked ProdReady",
                ));
            }
        }

        if existing.in_prod_date != incoming.in_prod_date {
            return Err(WriteError::conflict(
                ConflictKind::Immutable,
                "inProdDate",
                incoming.in_prod_date.map(|d| d.to_rfc3339()),
                "inProdDate cannot change",
            ));
        }
        Ok(())
    }

    /// A ProdReady Prod connection needs an incident connector on the agent or its owner
    async fn validate_incident_connector(&self, incoming: &DeleteAgent) -> WriteResult<()> {
        if prod_readiness(&incoming.connection_details) != Some(AgentReadiness::ProdReady)
            || incoming.icm.is_some()
        {
            return Ok(());
        }

        let owner_icm = match incoming.owner_id {
            Some(owner_id) => self
                .readers
                .owners
                .read_by_id(owner_id, Expand::None)
                .await?
                .and_then(|owner| owner.icm),
            None => None,
        };
        if owner_icm.is_none() {
            return Err(WriteError::conflict(
                ConflictKind::NullValue,
                "icm.connectorId",
                None,
                "agent or owner must have an incident connector",
            ));
        }
        Ok(())
    }

    fn stamp_in_prod_date(&self, incoming: &mut DeleteAgent) {
        if incoming.in_prod_date.is_none()
            && prod_readiness(&incoming.connection_details) == Some(AgentReadiness::ProdReady)
        {
            incoming.in_prod_date = Some(self.clock.now());
        }
    }
}

impl std::fmt::Debug for DeleteAgentPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteAgentPolicy")
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EntityPolicy for DeleteAgentPolicy {
    type Entity = DeleteAgent;

    fn reader(&self) -> &dyn EntityReader<DeleteAgent> {
        self.readers.agents.as_ref()
    }

    async fn data_owners(
        &self,
        _action: WriteAction,
        entity: &DeleteAgent,
        existing: Option<&DeleteAgent>,
    ) -> WriteResult<OwnerResolution> {
        let ids = [existing.and_then(|e| e.owner_id), entity.owner_id];
        let owners = read_owners(self.readers.owners.as_ref(), ids).await?;
        Ok(OwnerResolution::from_found(owners))
    }

    fn validate_properties(&self, action: WriteAction, incoming: &mut DeleteAgent) -> WriteResult<()> {
        embedded_owner_not_set(incoming.owner.as_deref())?;
        property_required(incoming.owner_id, "ownerId")?;

        normalize(&mut incoming.connection_details);
        if let Some(migrating) = incoming.migrating_connection_details.as_mut() {
            normalize(migrating);
        }
        self.connections
            .validate_details(CONNECTION_DETAILS, &incoming.connection_details)?;
        self.migrations.validate(action, incoming)?;

        if action == WriteAction::Create {
            property_should_not_be_set(incoming.in_prod_date, "inProdDate")?;
            self.connections
                .validate_authentication_unique(CONNECTION_DETAILS, &incoming.connection_details)?;
        }

        if let Some(icm) = incoming.icm {
            if icm.connector_id.is_nil() {
                return Err(WriteError::missing(
                    "icm.connectorId",
                    "icm.connectorId is required",
                ));
            }
        }
        Ok(())
    }

    async fn validate_consistency(
        &self,
        ctx: &WriteContext,
        action: WriteAction,
        incoming: &mut DeleteAgent,
        existing: Option<&DeleteAgent>,
    ) -> WriteResult<()> {
        let owners = self.readers.owners.as_ref();
        match existing {
            None => {
                force_preprod_ready(&mut incoming.connection_details);
                if let Some(owner_id) = incoming.owner_id {
                    reference_should_exist(owners, owner_id, "ownerId").await?;
                }
            }
            Some(existing) => {
                if let Some(owner_id) = incoming.owner_id.filter(|id| existing.owner_id != Some(*id)) {
                    reference_should_exist(owners, owner_id, "ownerId").await?;
                }

                if existing.connection_details.contains_key(&ReleaseState::Prod) {
                    self.validate_production_update(ctx, incoming, existing).await?;
                }

                if !existing.connection_details.contains_key(&ReleaseState::PreProd) {
                    force_preprod_ready(&mut incoming.connection_details);
                }

                if credentials_changed(&existing.connection_details, &incoming.connection_details) {
                    self.connections
                        .validate_authentication_unique(CONNECTION_DETAILS, &incoming.connection_details)?;
                }
            }
        }

        self.validate_incident_connector(incoming).await?;
        self.stamp_in_prod_date(incoming);
        tracing::trace!(%action, in_prod = incoming.in_prod_date.is_some(), "agent consistency checked");
        Ok(())
    }

    fn merge(&self, incoming: DeleteAgent, mut existing: DeleteAgent) -> DeleteAgent {
        existing.name = incoming.name;
        existing.description = incoming.description;
        existing.owner_id = incoming.owner_id;
        existing.connection_details = incoming.connection_details;
        existing.migrating_connection_details = incoming.migrating_connection_details;
        existing.icm = incoming.icm;
        existing.in_prod_date = incoming.in_prod_date;
        existing
    }

    fn incident_event(
        &self,
        action: WriteAction,
        committed: &DeleteAgent,
        prior: Option<&DeleteAgent>,
        options: DeleteOptions,
    ) -> Option<IncidentEvent> {
        let agent_id = committed.id()?;
        match action {
            WriteAction::SoftDelete => Some(IncidentEvent::AgentDeleted {
                agent_id,
                override_pending_commands: options.override_pending_commands,
                force: options.force,
            }),
            WriteAction::Create | WriteAction::Update => {
                let icm = committed.icm?;
                let changed = prior.map_or(true, |prior| prior.icm != Some(icm));
                changed.then_some(IncidentEvent::AgentRegistered {
                    agent_id,
                    owner_id: committed.owner_id,
                    connector_id: icm.connector_id,
                })
            }
        }
    }
}

fn prod_readiness(details: &ConnectionDetails) -> Option<AgentReadiness> {
    details
        .get(&ReleaseState::Prod)
        .and_then(|d| d.agent_readiness)
}

/// PreProd never gates production traffic
fn force_preprod_ready(details: &mut ConnectionDetails) {
    if let Some(preprod) = details.get_mut(&ReleaseState::PreProd) {
        preprod.agent_readiness = Some(AgentReadiness::ProdReady);
    }
}

/// Equal apart from readiness, with app id lists compared as sets
fn same_connection(a: &ConnectionDetail, b: &ConnectionDetail) -> bool {
    let app_set = |d: &ConnectionDetail| -> HashSet<Uuid> {
        d.aad_app_ids.iter().flatten().copied().collect()
    };
    a.protocol == b.protocol
        && a.authentication_type == b.authentication_type
        && a.release_state == b.release_state
        && a.aad_app_id == b.aad_app_id
        && a.msa_site_id == b.msa_site_id
        && app_set(a) == app_set(b)
}

/// Prod crosses protocol families while a migration is recorded on either side
fn is_production_migration(existing: &DeleteAgent, incoming: &DeleteAgent) -> bool {
    let migrating = |agent: &DeleteAgent| {
        agent
            .migrating_connection_details
            .as_ref()
            .is_some_and(|m| !m.is_empty())
    };
    let prod_family = |agent: &DeleteAgent| -> Option<ProtocolFamily> {
        agent
            .connection_details
            .get(&ReleaseState::Prod)
            .and_then(|d| d.protocol)
            .map(ProtocolId::family)
    };
    (migrating(existing) || migrating(incoming)) && prod_family(existing) != prod_family(incoming)
}

/// Identifiers changed on a release state present on both sides
///
/// Signal-only connections carry no credentials and never count.
fn credentials_changed(existing: &ConnectionDetails, incoming: &ConnectionDetails) -> bool {
    existing.iter().any(|(state, before)| {
        incoming.get(state).is_some_and(|after| {
            after.protocol != Some(ProtocolId::CosmosDeleteSignalV2)
                && (before.aad_app_id != after.aad_app_id || before.msa_site_id != after.msa_site_id)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_model::AuthenticationType;

    fn v1(state: ReleaseState, app: Uuid) -> ConnectionDetail {
        ConnectionDetail::new(state)
            .with_protocol(ProtocolId::CommandFeedV1)
            .with_aad_app(app)
            .with_readiness(AgentReadiness::TestInProd)
    }

    #[test]
    fn readiness_and_app_order_do_not_count_as_changes() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut left = ConnectionDetail::new(ReleaseState::Prod)
            .with_protocol(ProtocolId::CommandFeedV2)
            .with_aad_apps(vec![a, b])
            .with_readiness(AgentReadiness::TestInProd);
        left.authentication_type = Some(AuthenticationType::AadAppBasedAuth);
        let mut right = left.clone();
        right.aad_app_ids = Some(vec![b, a]);
        right.agent_readiness = Some(AgentReadiness::ProdReady);
        assert!(same_connection(&left, &right));

        right.aad_app_ids = Some(vec![a]);
        assert!(!same_connection(&left, &right));
    }

    #[test]
    fn production_migration_needs_a_family_change_and_a_migration() {
        let app = Uuid::new_v4();
        let existing = DeleteAgent::new("Agent", "Agent description")
            .with_connection(v1(ReleaseState::Prod, app))
            .with_migrating_connection(
                ConnectionDetail::new(ReleaseState::PreProd)
                    .with_protocol(ProtocolId::CommandFeedV2)
                    .with_aad_apps(vec![Uuid::new_v4()]),
            );

        let mut promoted = DeleteAgent::new("Agent", "Agent description").with_connection(
            ConnectionDetail::new(ReleaseState::Prod)
                .with_protocol(ProtocolId::CommandFeedV2)
                .with_aad_apps(vec![app]),
        );
        assert!(is_production_migration(&existing, &promoted));

        promoted.connection_details = existing.connection_details.clone();
        assert!(!is_production_migration(&existing, &promoted));

        let settled = DeleteAgent::new("Agent", "Agent description")
            .with_connection(v1(ReleaseState::Prod, app));
        let mut swapped = settled.clone();
        swapped.connection_details = promoted.connection_details.clone();
        swapped
            .connection_details
            .insert(ReleaseState::Prod, ConnectionDetail::new(ReleaseState::Prod).with_protocol(ProtocolId::PcfV2Batch));
        assert!(!is_production_migration(&settled, &swapped));
    }

    #[test]
    fn signal_only_connections_never_report_credential_changes() {
        let mut before = ConnectionDetails::new();
        before.insert(
            ReleaseState::Prod,
            ConnectionDetail::new(ReleaseState::Prod).with_protocol(ProtocolId::CosmosDeleteSignalV2),
        );
        let mut after = before.clone();
        if let Some(detail) = after.get_mut(&ReleaseState::Prod) {
            detail.msa_site_id = Some(7);
        }
        assert!(!credentials_changed(&before, &after));

        let mut before = ConnectionDetails::new();
        before.insert(ReleaseState::Prod, v1(ReleaseState::Prod, Uuid::new_v4()));
        let mut after = before.clone();
        after.insert(ReleaseState::Prod, v1(ReleaseState::Prod, Uuid::new_v4()));
        assert!(credentials_changed(&before, &after));
    }
}
