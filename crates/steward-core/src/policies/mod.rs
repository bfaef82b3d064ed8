//! Per-kind write policies
//!
//! Each policy plugs one entity kind into [`EntityWriter`](crate::writer::EntityWriter).

mod asset_group;
mod data_owner;
mod delete_agent;
mod variant_definition;

pub use asset_group::AssetGroupPolicy;
pub use data_owner::DataOwnerPolicy;
pub use delete_agent::DeleteAgentPolicy;
pub use variant_definition::VariantDefinitionPolicy;

use futures::future::try_join_all;
use steward_model::{ConflictKind, DataOwner, Entity, EntityId, WriteError, WriteResult};
use steward_validation::rules::property_should_not_be_set;

use crate::readers::{EntityReader, Expand};

/// Only `ownerId` is written; the expanded owner is read-side data
fn embedded_owner_not_set(owner: Option<&DataOwner>) -> WriteResult<()> {
    property_should_not_be_set(owner.map(|o| o.name.as_str()), "owner")
}

/// Non-deleted entity behind a reference, or `DoesNotExist` on `target`
async fn reference_should_exist<T: Entity>(
    reader: &dyn EntityReader<T>,
    id: EntityId,
    target: &str,
) -> WriteResult<T> {
    reader
        .read_by_id(id, Expand::None)
        .await?
        .filter(|entity| !entity.header().is_deleted)
        .ok_or_else(|| {
            WriteError::conflict(
                ConflictKind::DoesNotExist,
                target,
                Some(id.to_string()),
                "the referenced entity does not exist",
            )
        })
}

/// Owners behind `ids`, skipping unset references; lookups run concurrently
async fn read_owners(
    owners: &dyn EntityReader<DataOwner>,
    ids: impl IntoIterator<Item = Option<EntityId>>,
) -> WriteResult<Vec<Option<DataOwner>>> {
    let mut unique = Vec::new();
    for id in ids.into_iter().flatten() {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    try_join_all(unique.into_iter().map(|id| owners.read_by_id(id, Expand::None))).await
}
