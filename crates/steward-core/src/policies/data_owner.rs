//! Data owner rules

use async_trait::async_trait;
use steward_model::{DataOwner, Entity, WriteAction, WriteError, WriteResult};

use crate::authorization::OwnerResolution;
use crate::incident::IncidentEvent;
use crate::readers::{EntityReader, Readers};
use crate::writer::{DeleteOptions, EntityPolicy, WriteContext, WriterServices};

#[derive(Clone)]
pub struct DataOwnerPolicy {
    readers: Readers,
}

impl DataOwnerPolicy {
    #[must_use]
    pub fn new(services: &WriterServices) -> Self {
        Self {
            readers: services.readers.clone(),
        }
    }
}

impl std::fmt::Debug for DataOwnerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataOwnerPolicy").finish_non_exhaustive()
    }
}

fn required_not_empty<T>(values: &[T], target: &str) -> WriteResult<()> {
    if values.is_empty() {
        return Err(WriteError::missing(target, format!("{target} is required")));
    }
    Ok(())
}

#[async_trait]
impl EntityPolicy for DataOwnerPolicy {
    type Entity = DataOwner;

    fn reader(&self) -> &dyn EntityReader<DataOwner> {
        self.readers.owners.as_ref()
    }

    /// An owner is authorized against its own groups, stored and incoming
    async fn data_owners(
        &self,
        action: WriteAction,
        entity: &DataOwner,
        existing: Option<&DataOwner>,
    ) -> WriteResult<OwnerResolution> {
        Ok(match (action, existing) {
            (WriteAction::SoftDelete, Some(existing)) => {
                OwnerResolution::Owners(vec![existing.clone()])
            }
            (_, Some(existing)) => OwnerResolution::Owners(vec![existing.clone(), entity.clone()]),
            (_, None) if entity.write_security_groups.is_empty() => OwnerResolution::Bypass,
            (_, None) => OwnerResolution::Owners(vec![entity.clone()]),
        })
    }

    fn validate_properties(&self, _action: WriteAction, incoming: &mut DataOwner) -> WriteResult<()> {
        required_not_empty(&incoming.write_security_groups, "writeSecurityGroups")?;
        required_not_empty(&incoming.alert_contacts, "alertContacts")?;

        if let Some(group) = incoming.write_security_groups.iter().find(|g| g.is_nil()) {
            return Err(WriteError::invalid(
                "writeSecurityGroups",
                Some(group.to_string()),
                "security group ids must not be empty",
            ));
        }
        if let Some(icm) = incoming.icm {
            if icm.connector_id.is_nil() {
                return Err(WriteError::missing("icm.connectorId", "icm.connectorId is required"));
            }
        }
        Ok(())
    }

    async fn validate_consistency(
        &self,
        _ctx: &WriteContext,
        _action: WriteAction,
        _incoming: &mut DataOwner,
        _existing: Option<&DataOwner>,
    ) -> WriteResult<()> {
        Ok(())
    }

    fn merge(&self, incoming: DataOwner, mut existing: DataOwner) -> DataOwner {
        existing.name = incoming.name;
        existing.description = incoming.description;
        existing.write_security_groups = incoming.write_security_groups;
        existing.alert_contacts = incoming.alert_contacts;
        existing.icm = incoming.icm;
        existing
    }

    fn incident_event(
        &self,
        action: WriteAction,
        committed: &DataOwner,
        prior: Option<&DataOwner>,
        _options: DeleteOptions,
    ) -> Option<IncidentEvent> {
        if action == WriteAction::SoftDelete {
            return None;
        }
        let icm = committed.icm?;
        let changed = prior.map_or(true, |prior| prior.icm != Some(icm));
        changed.then_some(IncidentEvent::OwnerRegistered {
            owner_id: committed.id()?,
            connector_id: icm.connector_id,
        })
    }
}
