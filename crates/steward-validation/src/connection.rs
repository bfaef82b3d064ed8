//! Connection configuration validation
//!
//! Each agent kind declares the protocols and release states it accepts
//! through a [`KindPolicy`]; one [`ConnectionValidator`] applies any policy.
//! Checks per entry run in a fixed order: protocol membership, release-state
//! membership, then the identifier fields required by the protocol and
//! [`AuthenticationType`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use steward_model::{
    AuthenticationType, ConnectionDetail, ConnectionDetails, ProtocolFamily, ProtocolId,
    ReleaseState, WriteError, WriteResult,
};
use uuid::Uuid;

/// Protocols and release states an entity kind accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPolicy {
    pub valid_protocols: Vec<ProtocolId>,
    pub valid_release_states: Vec<ReleaseState>,
}

impl KindPolicy {
    #[must_use]
    pub fn new(valid_protocols: Vec<ProtocolId>, valid_release_states: Vec<ReleaseState>) -> Self {
        Self {
            valid_protocols,
            valid_release_states,
        }
    }

    /// Delete agents: the whole catalog, PreProd and Prod
    #[must_use]
    pub fn delete_agent() -> Self {
        Self::new(
            ProtocolId::ALL.to_vec(),
            vec![ReleaseState::PreProd, ReleaseState::Prod],
        )
    }

    #[inline]
    #[must_use]
    pub fn allows_protocol(&self, protocol: ProtocolId) -> bool {
        self.valid_protocols.contains(&protocol)
    }

    #[inline]
    #[must_use]
    pub fn allows_release_state(&self, state: ReleaseState) -> bool {
        self.valid_release_states.contains(&state)
    }
}

impl Default for KindPolicy {
    fn default() -> Self {
        Self::delete_agent()
    }
}

/// Validates connection maps against a [`KindPolicy`]
#[derive(Debug, Clone)]
pub struct ConnectionValidator {
    policy: KindPolicy,
}

impl ConnectionValidator {
    #[inline]
    #[must_use]
    pub fn new(policy: KindPolicy) -> Self {
        Self { policy }
    }

    #[inline]
    #[must_use]
    pub fn policy(&self) -> &KindPolicy {
        &self.policy
    }

    /// Validate one connection detail; `field` is the map it lives in
    pub fn validate(&self, field: &str, detail: &ConnectionDetail) -> WriteResult<()> {
        let at = entry_target(field, detail.release_state);

        let protocol = detail
            .protocol
            .ok_or_else(|| WriteError::missing(format!("{at}.protocol"), "protocol is required"))?;
        if !self.policy.allows_protocol(protocol) {
            return Err(WriteError::invalid(
                format!("{at}.protocol"),
                Some(protocol.to_string()),
                "unsupported protocol for this data agent",
            ));
        }

        if !self.policy.allows_release_state(detail.release_state) {
            return Err(WriteError::invalid(
                at,
                Some(detail.release_state.to_string()),
                "unsupported release state for this data agent",
            ));
        }

        if detail.agent_readiness.is_none() {
            return Err(WriteError::missing(
                format!("{at}.agentReadiness"),
                "agentReadiness is required",
            ));
        }

        validate_authentication(&at, protocol, detail)
    }

    /// Validate a whole map: keys agree with entries, one shared protocol,
    /// then every entry
    pub fn validate_details(&self, field: &str, details: &ConnectionDetails) -> WriteResult<()> {
        if details.is_empty() {
            return Err(WriteError::missing(field, format!("{field} is required")));
        }

        let mut shared: Option<ProtocolId> = None;
        for (state, detail) in details {
            if detail.release_state != *state {
                return Err(WriteError::invalid(
                    format!("{}.releaseState", entry_target(field, *state)),
                    Some(detail.release_state.to_string()),
                    "release state does not match its key",
                ));
            }

            self.validate(field, detail)?;

            if let Some(protocol) = detail.protocol {
                match shared {
                    Some(first) if first != protocol => {
                        return Err(WriteError::invalid(
                            format!("{field}.protocol"),
                            Some(protocol.to_string()),
                            "protocol must be the same across all release states",
                        ));
                    }
                    _ => shared = Some(protocol),
                }
            }
        }
        Ok(())
    }

    /// PreProd credentials must not be reused by any other release state
    pub fn validate_authentication_unique(
        &self,
        field: &str,
        details: &ConnectionDetails,
    ) -> WriteResult<()> {
        let Some(preprod) = details.get(&ReleaseState::PreProd) else {
            return Ok(());
        };
        let preprod_apps: HashSet<Uuid> = preprod.app_ids().into_iter().collect();

        for (state, detail) in details {
            if *state == ReleaseState::PreProd {
                continue;
            }

            if let (Some(a), Some(b)) = (preprod.msa_site_id, detail.msa_site_id) {
                if a == b {
                    return Err(WriteError::invalid(
                        format!("{}.msaSiteId", entry_target(field, ReleaseState::PreProd)),
                        Some(a.to_string()),
                        format!("msaSiteId is shared with {state}"),
                    ));
                }
            }

            if let Some(shared) = detail.app_ids().into_iter().find(|id| preprod_apps.contains(id)) {
                return Err(WriteError::invalid(
                    format!("{}.aadAppId(s)", entry_target(field, ReleaseState::PreProd)),
                    Some(shared.to_string()),
                    format!("application id is shared with {state}"),
                ));
            }
        }
        Ok(())
    }
}

impl Default for ConnectionValidator {
    fn default() -> Self {
        Self::new(KindPolicy::default())
    }
}

/// Canonicalise identifier fields before validation
///
/// An empty `aadAppIds` list counts as absent, and V2 protocols never use
/// the single `aadAppId`, so a stray value is dropped.
pub fn normalize(details: &mut ConnectionDetails) {
    for detail in details.values_mut() {
        if detail.aad_app_ids.as_ref().is_some_and(Vec::is_empty) {
            detail.aad_app_ids = None;
        }
        if detail.protocol.map(ProtocolId::family) == Some(ProtocolFamily::V2) {
            detail.aad_app_id = None;
        }
    }
}

fn entry_target(field: &str, state: ReleaseState) -> String {
    format!("{field}[{state}]")
}

fn validate_authentication(at: &str, protocol: ProtocolId, detail: &ConnectionDetail) -> WriteResult<()> {
    match protocol {
        // signal-only, no credentials
        ProtocolId::CosmosDeleteSignalV2 => Ok(()),
        ProtocolId::CommandFeedV1 => match detail.authentication_type {
            None => Err(WriteError::missing(
                format!("{at}.authenticationType"),
                "authenticationType is required",
            )),
            Some(AuthenticationType::AadAppBasedAuth) => validate_aad_single_or_list(at, detail),
            Some(AuthenticationType::MsaSiteBasedAuth) => match detail.msa_site_id {
                Some(site) if site != 0 => Ok(()),
                _ => Err(WriteError::missing(
                    format!("{at}.msaSiteId"),
                    "MSA site authentication requires msaSiteId",
                )),
            },
        },
        ProtocolId::CommandFeedV2 | ProtocolId::PcfV2Batch => {
            if detail.authentication_type.is_none() {
                return Err(WriteError::missing(
                    format!("{at}.authenticationType"),
                    "authenticationType is required",
                ));
            }
            match &detail.aad_app_ids {
                Some(ids) if !ids.is_empty() => validate_app_id_list(at, ids),
                _ => Err(WriteError::missing(
                    format!("{at}.aadAppIds"),
                    "batch protocols require at least one application id",
                )),
            }
        }
    }
}

/// Exactly one of `aadAppId` and `aadAppIds`
fn validate_aad_single_or_list(at: &str, detail: &ConnectionDetail) -> WriteResult<()> {
    let single = detail.aad_app_id.filter(|id| !id.is_nil());
    let list = detail.aad_app_ids.as_ref().filter(|ids| !ids.is_empty());

    match (single, list) {
        (None, None) => Err(WriteError::missing(
            format!("{at}.aadAppId(s)"),
            "AAD authentication requires aadAppId or aadAppIds",
        )),
        (Some(_), Some(_)) => Err(WriteError::invalid(
            format!("{at}.aadAppIds"),
            None,
            "aadAppId and aadAppIds are mutually exclusive",
        )),
        (Some(_), None) => Ok(()),
        (None, Some(ids)) => validate_app_id_list(at, ids),
    }
}

fn validate_app_id_list(at: &str, ids: &[Uuid]) -> WriteResult<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if id.is_nil() {
            return Err(WriteError::missing(
                format!("{at}.aadAppIds"),
                "the list must not contain empty ids",
            ));
        }
        if !seen.insert(*id) {
            return Err(WriteError::invalid(
                format!("{at}.aadAppIds"),
                Some(id.to_string()),
                "duplicate application id",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use steward_model::AgentReadiness;

    fn v1(state: ReleaseState) -> ConnectionDetail {
        ConnectionDetail::new(state)
            .with_protocol(ProtocolId::CommandFeedV1)
            .with_aad_app(Uuid::new_v4())
    }

    fn target(result: WriteResult<()>) -> String {
        result.unwrap_err().target().unwrap_or_default().to_string()
    }

    #[test]
    fn protocol_outside_policy_is_rejected_first() {
        let validator = ConnectionValidator::new(KindPolicy::new(
            vec![ProtocolId::CommandFeedV2],
            vec![ReleaseState::Prod],
        ));
        // also has an unsupported release state; protocol is reported
        let detail = v1(ReleaseState::PreProd);
        assert_eq!(
            target(validator.validate("connectionDetails", &detail)),
            "connectionDetails[PreProd].protocol"
        );
    }

    #[test]
    fn release_state_outside_policy_is_rejected() {
        let validator = ConnectionValidator::default();
        let detail = v1(ReleaseState::Ring1);
        assert_eq!(
            target(validator.validate("connectionDetails", &detail)),
            "connectionDetails[Ring1]"
        );
    }

    #[test]
    fn aad_requires_exactly_one_identifier_field() {
        let validator = ConnectionValidator::default();
        let mut detail = v1(ReleaseState::Prod);
        detail.aad_app_id = None;
        let err = validator.validate("connectionDetails", &detail).unwrap_err();
        assert!(matches!(err, WriteError::MissingProperty { .. }));
        assert_eq!(err.target(), Some("connectionDetails[Prod].aadAppId(s)"));

        detail.aad_app_id = Some(Uuid::new_v4());
        detail.aad_app_ids = Some(vec![Uuid::new_v4()]);
        let err = validator.validate("connectionDetails", &detail).unwrap_err();
        assert!(matches!(err, WriteError::InvalidProperty { .. }));

        detail.aad_app_id = None;
        assert!(validator.validate("connectionDetails", &detail).is_ok());
    }

    #[test]
    fn nil_and_duplicate_app_ids_are_rejected() {
        let validator = ConnectionValidator::default();
        let detail = ConnectionDetail::new(ReleaseState::Prod)
            .with_protocol(ProtocolId::PcfV2Batch)
            .with_aad_apps(vec![Uuid::nil()]);
        assert!(matches!(
            validator.validate("connectionDetails", &detail).unwrap_err(),
            WriteError::MissingProperty { .. }
        ));

        let id = Uuid::new_v4();
        let detail = detail.with_aad_apps(vec![id, id]);
        assert!(matches!(
            validator.validate("connectionDetails", &detail).unwrap_err(),
            WriteError::InvalidProperty { .. }
        ));
    }

    #[test]
    fn msa_auth_requires_site_id() {
        let validator = ConnectionValidator::default();
        let mut detail = ConnectionDetail::new(ReleaseState::Prod)
            .with_protocol(ProtocolId::CommandFeedV1)
            .with_msa_site(0);
        assert_eq!(
            target(validator.validate("connectionDetails", &detail)),
            "connectionDetails[Prod].msaSiteId"
        );
        detail.msa_site_id = Some(296_170);
        assert!(validator.validate("connectionDetails", &detail).is_ok());
    }

    #[test]
    fn signal_protocol_needs_no_credentials() {
        let validator = ConnectionValidator::default();
        let detail = ConnectionDetail::new(ReleaseState::Prod)
            .with_protocol(ProtocolId::CosmosDeleteSignalV2);
        assert!(validator.validate("connectionDetails", &detail).is_ok());
    }

    #[test]
    fn readiness_is_required() {
        let validator = ConnectionValidator::default();
        let mut detail = v1(ReleaseState::Prod);
        detail.agent_readiness = None;
        assert_eq!(
            target(validator.validate("connectionDetails", &detail)),
            "connectionDetails[Prod].agentReadiness"
        );
    }

    #[test]
    fn map_requires_one_protocol() {
        let validator = ConnectionValidator::default();
        let mut details = ConnectionDetails::new();
        details.insert(ReleaseState::PreProd, v1(ReleaseState::PreProd));
        details.insert(
            ReleaseState::Prod,
            ConnectionDetail::new(ReleaseState::Prod)
                .with_protocol(ProtocolId::CosmosDeleteSignalV2),
        );
        assert_eq!(
            target(validator.validate_details("connectionDetails", &details)),
            "connectionDetails.protocol"
        );

        assert!(matches!(
            validator
                .validate_details("connectionDetails", &ConnectionDetails::new())
                .unwrap_err(),
            WriteError::MissingProperty { .. }
        ));
    }

    #[test]
    fn map_keys_must_match_entries() {
        let validator = ConnectionValidator::default();
        let mut details = ConnectionDetails::new();
        details.insert(ReleaseState::Prod, v1(ReleaseState::PreProd));
        assert_eq!(
            target(validator.validate_details("connectionDetails", &details)),
            "connectionDetails[Prod].releaseState"
        );
    }

    #[test]
    fn preprod_credentials_must_be_unique() {
        let validator = ConnectionValidator::default();
        let shared = Uuid::new_v4();
        let mut details = ConnectionDetails::new();
        details.insert(
            ReleaseState::PreProd,
            ConnectionDetail::new(ReleaseState::PreProd)
                .with_protocol(ProtocolId::CommandFeedV1)
                .with_aad_app(shared),
        );
        details.insert(
            ReleaseState::Prod,
            ConnectionDetail::new(ReleaseState::Prod)
                .with_protocol(ProtocolId::CommandFeedV1)
                .with_aad_app(shared)
                .with_readiness(AgentReadiness::ProdReady),
        );
        assert_eq!(
            target(validator.validate_authentication_unique("connectionDetails", &details)),
            "connectionDetails[PreProd].aadAppId(s)"
        );

        details.get_mut(&ReleaseState::Prod).unwrap().aad_app_id = Some(Uuid::new_v4());
        assert!(validator
            .validate_authentication_unique("connectionDetails", &details)
            .is_ok());
    }

    #[test]
    fn normalize_drops_unused_fields() {
        let mut details = ConnectionDetails::new();
        let mut detail = ConnectionDetail::new(ReleaseState::Prod)
            .with_protocol(ProtocolId::CommandFeedV2)
            .with_aad_apps(vec![Uuid::new_v4()]);
        detail.aad_app_id = Some(Uuid::new_v4());
        details.insert(ReleaseState::Prod, detail);
        details.insert(
            ReleaseState::PreProd,
            ConnectionDetail::new(ReleaseState::PreProd)
                .with_protocol(ProtocolId::CommandFeedV1)
                .with_aad_apps(Vec::new()),
        );

        normalize(&mut details);
        assert_eq!(details[&ReleaseState::Prod].aad_app_id, None);
        assert_eq!(details[&ReleaseState::PreProd].aad_app_ids, None);
    }
}
