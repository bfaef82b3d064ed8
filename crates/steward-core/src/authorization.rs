//! Authorization gate
//!
//! A principal's security groups come from a [`SecurityGroupDirectory`] and
//! are cached for a configurable time. Roles are derived from the groups:
//!
//! - **ServiceAdmin**: member of a configured admin group
//! - **VariantEditor**: member of a configured variant editor group
//! - **ServiceEditor**: member of a write security group of every data owner
//!   relevant to the entity; service admins hold it implicitly
//!
//! Owner resolution may decline to name owners ([`OwnerResolution::Bypass`])
//! when the entity references none that exist. The write then proceeds to
//! validation, which reports the precise field error.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use steward_model::{DataOwner, PrincipalId, WriteError, WriteResult};
use uuid::Uuid;

use crate::config::{CacheConfig, WriterConfig};

/// Roles a write may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorizationRole {
    ServiceEditor,
    VariantEditor,
    ServiceAdmin,
}

impl std::fmt::Display for AuthorizationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServiceEditor => f.write_str("ServiceEditor"),
            Self::VariantEditor => f.write_str("VariantEditor"),
            Self::ServiceAdmin => f.write_str("ServiceAdmin"),
        }
    }
}

/// Resolves a principal's security group memberships
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecurityGroupDirectory: Send + Sync {
    async fn security_groups(&self, principal: &PrincipalId) -> WriteResult<Vec<Uuid>>;
}

/// Directory backed by an in-process table
#[derive(Debug, Default)]
pub struct StaticGroupDirectory {
    memberships: DashMap<PrincipalId, Vec<Uuid>>,
}

impl StaticGroupDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, principal: PrincipalId, group: Uuid) {
        self.memberships.entry(principal).or_default().push(group);
    }

    pub fn revoke_all(&self, principal: &PrincipalId) {
        self.memberships.remove(principal);
    }
}

#[async_trait]
impl SecurityGroupDirectory for StaticGroupDirectory {
    async fn security_groups(&self, principal: &PrincipalId) -> WriteResult<Vec<Uuid>> {
        Ok(self
            .memberships
            .get(principal)
            .map(|groups| groups.clone())
            .unwrap_or_default())
    }
}

/// Data owners whose write groups gate a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerResolution {
    /// No check; validation reports the missing or dangling reference
    Bypass,
    Owners(Vec<DataOwner>),
}

impl OwnerResolution {
    /// Owners that exist, or [`OwnerResolution::Bypass`] when none do
    #[must_use]
    pub fn from_found(owners: impl IntoIterator<Item = Option<DataOwner>>) -> Self {
        let owners: Vec<DataOwner> = owners.into_iter().flatten().collect();
        if owners.is_empty() {
            Self::Bypass
        } else {
            Self::Owners(owners)
        }
    }

    #[must_use]
    pub fn owners(&self) -> &[DataOwner] {
        match self {
            Self::Bypass => &[],
            Self::Owners(owners) => owners,
        }
    }
}

/// Roles held by one principal
#[derive(Debug, Clone)]
pub struct AuthorizationContext {
    pub groups: Arc<HashSet<Uuid>>,
    pub is_service_admin: bool,
    pub is_variant_editor: bool,
}

impl AuthorizationContext {
    #[must_use]
    pub fn is_member_of_any(&self, groups: &[Uuid]) -> bool {
        groups.iter().any(|g| self.groups.contains(g))
    }
}

/// Checks principals against the role a write requires
pub struct AuthorizationGate {
    directory: Arc<dyn SecurityGroupDirectory>,
    service_admin_groups: Vec<Uuid>,
    variant_editor_groups: Vec<Uuid>,
    cache: Cache<PrincipalId, Arc<HashSet<Uuid>>>,
}

impl std::fmt::Debug for AuthorizationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGate")
            .field("service_admin_groups", &self.service_admin_groups)
            .field("variant_editor_groups", &self.variant_editor_groups)
            .field("cached_principals", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl AuthorizationGate {
    #[must_use]
    pub fn new(
        directory: Arc<dyn SecurityGroupDirectory>,
        service_admin_groups: Vec<Uuid>,
        variant_editor_groups: Vec<Uuid>,
        cache: CacheConfig,
    ) -> Self {
        Self {
            directory,
            service_admin_groups,
            variant_editor_groups,
            cache: Cache::builder()
                .max_capacity(cache.max_capacity)
                .time_to_live(cache.ttl())
                .build(),
        }
    }

    /// Gate using the groups and cache settings of `config`
    #[must_use]
    pub fn from_config(directory: Arc<dyn SecurityGroupDirectory>, config: &WriterConfig) -> Self {
        Self::new(
            directory,
            config.service_admin_groups.clone(),
            config.variant_editor_groups.clone(),
            config.authorization_cache,
        )
    }

    async fn groups_of(&self, principal: &PrincipalId) -> WriteResult<Arc<HashSet<Uuid>>> {
        if let Some(groups) = self.cache.get(principal).await {
            return Ok(groups);
        }

        let groups: Arc<HashSet<Uuid>> = Arc::new(
            self.directory
                .security_groups(principal)
                .await?
                .into_iter()
                .collect(),
        );
        self.cache.insert(principal.clone(), groups.clone()).await;
        Ok(groups)
    }

    /// Resolve the principal's groups and static roles
    pub async fn context(&self, principal: &PrincipalId) -> WriteResult<AuthorizationContext> {
        let groups = self.groups_of(principal).await?;
        let is_service_admin = self.service_admin_groups.iter().any(|g| groups.contains(g));
        let is_variant_editor = self.variant_editor_groups.iter().any(|g| groups.contains(g));
        Ok(AuthorizationContext {
            groups,
            is_service_admin,
            is_variant_editor,
        })
    }

    pub async fn is_service_admin(&self, principal: &PrincipalId) -> WriteResult<bool> {
        Ok(self.context(principal).await?.is_service_admin)
    }

    /// Drop cached memberships so the next check hits the directory
    pub async fn invalidate(&self, principal: &PrincipalId) {
        self.cache.invalidate(principal).await;
    }

    /// Fail with [`WriteError::MissingWritePermission`] unless `principal`
    /// holds `role` for the given owners
    pub async fn authorize(
        &self,
        principal: &PrincipalId,
        role: AuthorizationRole,
        owners: &OwnerResolution,
    ) -> WriteResult<()> {
        let context = self.context(principal).await?;

        let denied = match role {
            AuthorizationRole::ServiceAdmin => {
                (!context.is_service_admin).then(|| self.service_admin_groups.clone())
            }
            AuthorizationRole::VariantEditor => {
                (!context.is_variant_editor).then(|| self.variant_editor_groups.clone())
            }
            AuthorizationRole::ServiceEditor => {
                if context.is_service_admin {
                    None
                } else {
                    Self::check_owners(&context, owners)
                }
            }
        };

        match denied {
            None => Ok(()),
            Some(groups) => {
                tracing::debug!(%principal, %role, ?groups, "authorization denied");
                Err(WriteError::MissingWritePermission {
                    principal: principal.to_string(),
                    role: role.to_string(),
                    groups,
                })
            }
        }
    }

    /// Like [`authorize`](Self::authorize) but reports denial as `false`
    pub async fn try_authorize(
        &self,
        principal: &PrincipalId,
        role: AuthorizationRole,
        owners: &OwnerResolution,
    ) -> WriteResult<bool> {
        match self.authorize(principal, role, owners).await {
            Ok(()) => Ok(true),
            Err(WriteError::MissingWritePermission { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Groups of the first owner the principal cannot write for
    fn check_owners(context: &AuthorizationContext, owners: &OwnerResolution) -> Option<Vec<Uuid>> {
        match owners {
            OwnerResolution::Bypass => None,
            OwnerResolution::Owners(owners) if owners.is_empty() => Some(Vec::new()),
            OwnerResolution::Owners(owners) => owners
                .iter()
                // owners without groups are rejected by validation instead
                .filter(|owner| !owner.write_security_groups.is_empty())
                .find(|owner| !context.is_member_of_any(&owner.write_security_groups))
                .map(|owner| owner.write_security_groups.clone()),
        }
    }
}
