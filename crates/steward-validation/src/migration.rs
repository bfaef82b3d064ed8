//! Protocol migration rules
//!
//! An agent migrates protocols by carrying a second connection map,
//! `migratingConnectionDetails`, next to its live one. Which live protocol
//! may move to which migrating protocol is a fixed, directed table; any
//! pair not listed is refused.

use steward_model::{
    ConnectionDetails, DeleteAgent, ProtocolId, ReleaseState, WriteAction, WriteError, WriteResult,
};

use crate::connection::ConnectionValidator;

/// Error target for any disallowed protocol pairing
pub const MIGRATING_PROTOCOL_TARGET: &str = "migratingConnectionDetail.protocol";

/// Directed (live, migrating) protocol pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationTable {
    pairs: &'static [(ProtocolId, ProtocolId)],
}

impl MigrationTable {
    /// V1 command feeds and delete signals move to either V2 protocol, and
    /// a V2 agent may roll back to either V1 protocol
    pub const STANDARD: MigrationTable = MigrationTable {
        pairs: &[
            (ProtocolId::CommandFeedV1, ProtocolId::CommandFeedV2),
            (ProtocolId::CommandFeedV1, ProtocolId::PcfV2Batch),
            (ProtocolId::CosmosDeleteSignalV2, ProtocolId::CommandFeedV2),
            (ProtocolId::CosmosDeleteSignalV2, ProtocolId::PcfV2Batch),
            (ProtocolId::CommandFeedV2, ProtocolId::CommandFeedV1),
            (ProtocolId::CommandFeedV2, ProtocolId::CosmosDeleteSignalV2),
            (ProtocolId::PcfV2Batch, ProtocolId::CommandFeedV1),
            (ProtocolId::PcfV2Batch, ProtocolId::CosmosDeleteSignalV2),
        ],
    };

    #[inline]
    #[must_use]
    pub fn allows(&self, from: ProtocolId, to: ProtocolId) -> bool {
        self.pairs.iter().any(|&(f, t)| f == from && t == to)
    }

    #[inline]
    #[must_use]
    pub fn pairs(&self) -> &'static [(ProtocolId, ProtocolId)] {
        self.pairs
    }

    /// Protocols reachable from `from`
    #[must_use]
    pub fn targets_of(&self, from: ProtocolId) -> Vec<ProtocolId> {
        self.pairs
            .iter()
            .filter(|(f, _)| *f == from)
            .map(|(_, t)| *t)
            .collect()
    }
}

impl Default for MigrationTable {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Checks an agent's migrating connection map against its live map
#[derive(Debug, Clone)]
pub struct MigrationValidator {
    table: MigrationTable,
    connections: ConnectionValidator,
}

impl MigrationValidator {
    #[inline]
    #[must_use]
    pub fn new(table: MigrationTable, connections: ConnectionValidator) -> Self {
        Self { table, connections }
    }

    #[inline]
    #[must_use]
    pub fn table(&self) -> &MigrationTable {
        &self.table
    }

    /// Validate `agent.migrating_connection_details` for `action`
    ///
    /// Order: no migration on create; no release state both live and
    /// migrating; every (live, migrating) protocol pair in the table; the
    /// migrating entries themselves; Prod stays live; credentials stay
    /// unique across the two maps.
    pub fn validate(&self, action: WriteAction, agent: &DeleteAgent) -> WriteResult<()> {
        let Some(migrating) = agent.migrating_connection_details.as_ref() else {
            return Ok(());
        };

        if action == WriteAction::Create {
            return Err(WriteError::invalid(
                "migratingConnectionDetails",
                Some(format!("{:?}", migrating.keys().collect::<Vec<_>>())),
                "migratingConnectionDetails must not be set on a new data agent",
            ));
        }

        if migrating.is_empty() {
            return Ok(());
        }

        let live = &agent.connection_details;

        if let Some(state) = migrating.keys().find(|s| live.contains_key(s)) {
            return Err(WriteError::invalid(
                "connectionDetails",
                Some(state.to_string()),
                "a release state cannot hold both a live and a migrating connection",
            ));
        }

        self.validate_pairs(live, migrating)?;

        self.connections
            .validate_details("migratingConnectionDetails", migrating)?;

        if !live.contains_key(&ReleaseState::Prod) {
            return Err(WriteError::invalid(
                "connectionDetails",
                None,
                "a migrating agent must keep its Prod connection",
            ));
        }

        self.validate_cross_credentials(live, migrating)
    }

    fn validate_pairs(
        &self,
        live: &ConnectionDetails,
        migrating: &ConnectionDetails,
    ) -> WriteResult<()> {
        for target in migrating.values().filter_map(|d| d.protocol) {
            for source in live.values().filter_map(|d| d.protocol) {
                if !self.table.allows(source, target) {
                    tracing::debug!(%source, %target, "protocol migration refused");
                    return Err(WriteError::invalid(
                        MIGRATING_PROTOCOL_TARGET,
                        Some(target.to_string()),
                        format!("{source} cannot migrate to {target}"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// PreProd of one map against Prod of the other
    fn validate_cross_credentials(
        &self,
        live: &ConnectionDetails,
        migrating: &ConnectionDetails,
    ) -> WriteResult<()> {
        let combos = [
            (migrating.get(&ReleaseState::PreProd), live.get(&ReleaseState::Prod)),
            (live.get(&ReleaseState::PreProd), migrating.get(&ReleaseState::Prod)),
        ];
        for (preprod, prod) in combos {
            if let (Some(preprod), Some(prod)) = (preprod, prod) {
                let mut cross = ConnectionDetails::new();
                cross.insert(ReleaseState::PreProd, preprod.clone());
                cross.insert(ReleaseState::Prod, prod.clone());
                self.connections
                    .validate_authentication_unique("migratingConnectionDetails", &cross)?;
            }
        }
        Ok(())
    }
}

impl Default for MigrationValidator {
    fn default() -> Self {
        Self::new(MigrationTable::STANDARD, ConnectionValidator::default())
    }
}
