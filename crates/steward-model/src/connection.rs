//! Agent connection configuration
//!
//! A data agent carries one [`ConnectionDetail`] per [`ReleaseState`].
//! Which identifier fields must be populated depends on the protocol and
//! the [`AuthenticationType`]; the rules live in `steward-validation`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolId {
    CommandFeedV1,
    CommandFeedV2,
    #[serde(rename = "PCFV2Batch")]
    PcfV2Batch,
    CosmosDeleteSignalV2,
}

/// Generation a protocol belongs to; migrations move agents from V1 to V2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolFamily {
    V1,
    V2,
}

impl ProtocolId {
    /// Every protocol in the catalog
    pub const ALL: [ProtocolId; 4] = [
        Self::CommandFeedV1,
        Self::CommandFeedV2,
        Self::PcfV2Batch,
        Self::CosmosDeleteSignalV2,
    ];

    #[inline]
    #[must_use]
    pub fn family(self) -> ProtocolFamily {
        match self {
            Self::CommandFeedV1 | Self::CosmosDeleteSignalV2 => ProtocolFamily::V1,
            Self::CommandFeedV2 | Self::PcfV2Batch => ProtocolFamily::V2,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CommandFeedV1 => "CommandFeedV1",
            Self::CommandFeedV2 => "CommandFeedV2",
            Self::PcfV2Batch => "PCFV2Batch",
            Self::CosmosDeleteSignalV2 => "CosmosDeleteSignalV2",
        }
    }
}

impl std::fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment stage of a connection configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReleaseState {
    PreProd,
    Ring1,
    Ring2,
    Ring3,
    Prod,
}

impl ReleaseState {
    pub const ALL: [ReleaseState; 5] = [
        Self::PreProd,
        Self::Ring1,
        Self::Ring2,
        Self::Ring3,
        Self::Prod,
    ];
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PreProd => "PreProd",
            Self::Ring1 => "Ring1",
            Self::Ring2 => "Ring2",
            Self::Ring3 => "Ring3",
            Self::Prod => "Prod",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthenticationType {
    AadAppBasedAuth,
    MsaSiteBasedAuth,
}

impl std::fmt::Display for AuthenticationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AadAppBasedAuth => f.write_str("AadAppBasedAuth"),
            Self::MsaSiteBasedAuth => f.write_str("MsaSiteBasedAuth"),
        }
    }
}

/// Declared maturity of a connection for production traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentReadiness {
    TestInProd,
    ProdReady,
}

impl std::fmt::Display for AgentReadiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TestInProd => f.write_str("TestInProd"),
            Self::ProdReady => f.write_str("ProdReady"),
        }
    }
}

/// One protocol/auth configuration for one release state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_type: Option<AuthenticationType>,
    pub release_state: ReleaseState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_readiness: Option<AgentReadiness>,
    /// Single application id (interactive AAD auth)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aad_app_id: Option<Uuid>,
    /// Application ids (batch AAD auth)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aad_app_ids: Option<Vec<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msa_site_id: Option<u64>,
}

impl ConnectionDetail {
    /// Bare detail for a release state; add protocol and auth with the builders
    #[must_use]
    pub fn new(release_state: ReleaseState) -> Self {
        Self {
            protocol: None,
            authentication_type: None,
            release_state,
            agent_readiness: Some(AgentReadiness::TestInProd),
            aad_app_id: None,
            aad_app_ids: None,
            msa_site_id: None,
        }
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: ProtocolId) -> Self {
        self.protocol = Some(protocol);
        self
    }

    #[must_use]
    pub fn with_readiness(mut self, readiness: AgentReadiness) -> Self {
        self.agent_readiness = Some(readiness);
        self
    }

    /// Interactive AAD auth with a single app id
    #[must_use]
    pub fn with_aad_app(mut self, app_id: Uuid) -> Self {
        self.authentication_type = Some(AuthenticationType::AadAppBasedAuth);
        self.aad_app_id = Some(app_id);
        self
    }

    /// Batch AAD auth with a list of app ids
    #[must_use]
    pub fn with_aad_apps(mut self, app_ids: Vec<Uuid>) -> Self {
        self.authentication_type = Some(AuthenticationType::AadAppBasedAuth);
        self.aad_app_ids = Some(app_ids);
        self
    }

    #[must_use]
    pub fn with_msa_site(mut self, site_id: u64) -> Self {
        self.authentication_type = Some(AuthenticationType::MsaSiteBasedAuth);
        self.msa_site_id = Some(site_id);
        self
    }

    /// All AAD application ids this detail authenticates with
    #[must_use]
    pub fn app_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.aad_app_id.into_iter().collect();
        if let Some(list) = &self.aad_app_ids {
            ids.extend(list.iter().copied());
        }
        ids
    }
}

/// Release state to connection detail, one entry per release state
pub type ConnectionDetails = BTreeMap<ReleaseState, ConnectionDetail>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn protocol_families() {
        assert_eq!(ProtocolId::CommandFeedV1.family(), ProtocolFamily::V1);
        assert_eq!(ProtocolId::CosmosDeleteSignalV2.family(), ProtocolFamily::V1);
        assert_eq!(ProtocolId::CommandFeedV2.family(), ProtocolFamily::V2);
        assert_eq!(ProtocolId::PcfV2Batch.family(), ProtocolFamily::V2);
    }

    #[test]
    fn connection_details_serialize_with_catalog_names() {
        let mut details = ConnectionDetails::new();
        details.insert(
            ReleaseState::Prod,
            ConnectionDetail::new(ReleaseState::Prod)
                .with_protocol(ProtocolId::PcfV2Batch)
                .with_aad_apps(vec![Uuid::nil()]),
        );

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["Prod"]["protocol"], "PCFV2Batch");
        assert_eq!(json["Prod"]["authenticationType"], "AadAppBasedAuth");
        assert!(json["Prod"].get("msaSiteId").is_none());
    }

    #[test]
    fn app_ids_merges_single_and_list() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut detail = ConnectionDetail::new(ReleaseState::PreProd).with_aad_apps(vec![b]);
        detail.aad_app_id = Some(a);
        assert_eq!(detail.app_ids(), vec![a, b]);
    }
}
