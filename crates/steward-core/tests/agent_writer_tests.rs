use pretty_assertions::assert_eq;
use steward_core::incident::IncidentEvent;
use steward_core::DeleteOptions;
use steward_model::{
    AgentReadiness, ConflictKind, ConnectionDetail, ConnectionDetails, DeleteAgent, ETag, Entity,
    EntityId, ProtocolId, ReleaseState, WriteError,
};
use steward_test_utils::{
    admin, editor, for_update, outsider, owner, owner_with_groups, preprod_agent, v1_agent,
    v1_detail, v2_detail, TestEnvironment, OTHER_GROUP,
};
use steward_validation::migration::MIGRATING_PROTOCOL_TARGET;
use uuid::Uuid;

fn target(err: &WriteError) -> &str {
    err.target().unwrap_or_default()
}

fn prod_only_agent(owner_id: EntityId, detail: ConnectionDetail) -> DeleteAgent {
    DeleteAgent::new("Blob Delete Agent", "Deletes blobs for the storage team")
        .with_owner_id(owner_id)
        .with_connection(detail)
}

fn detail_for(protocol: ProtocolId, state: ReleaseState) -> ConnectionDetail {
    let detail = ConnectionDetail::new(state).with_protocol(protocol);
    match protocol {
        ProtocolId::CommandFeedV1 => detail.with_aad_app(Uuid::new_v4()),
        ProtocolId::CommandFeedV2 | ProtocolId::PcfV2Batch => detail.with_aad_apps(vec![Uuid::new_v4()]),
        ProtocolId::CosmosDeleteSignalV2 => detail,
    }
}

/// Swap the live Prod connection and record the other side as migrating PreProd
fn switch_prod(mut agent: DeleteAgent, live: ConnectionDetail, migrating: ConnectionDetail) -> DeleteAgent {
    agent.connection_details.insert(ReleaseState::Prod, live);
    let mut map = ConnectionDetails::new();
    map.insert(ReleaseState::PreProd, migrating);
    agent.migrating_connection_details = Some(map);
    agent
}

/// Agent already serving production traffic
async fn seed_prod_ready_agent(env: &TestEnvironment) -> DeleteAgent {
    let owner = env.seed_owner().await;
    let mut agent = v1_agent(owner.id().unwrap()).with_icm(Uuid::new_v4());
    agent.connection_details.get_mut(&ReleaseState::Prod).unwrap().agent_readiness =
        Some(AgentReadiness::ProdReady);
    agent.in_prod_date = Some(env.now());
    env.seed(agent).await
}

#[tokio::test]
async fn create_assigns_id_and_strips_tracking() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;

    let created = env
        .writers
        .agents
        .create(&env.ctx(editor()), v1_agent(owner.id().unwrap()))
        .await
        .unwrap();

    assert!(created.id().is_some());
    assert!(created.header.e_tag.is_some());
    assert!(created.header.tracking_details.is_none());
    assert_eq!(
        created.connection_details[&ReleaseState::PreProd].agent_readiness,
        Some(AgentReadiness::ProdReady)
    );
    assert_eq!(
        created.connection_details[&ReleaseState::Prod].agent_readiness,
        Some(AgentReadiness::TestInProd)
    );
    assert!(env.notifier.events().is_empty());

    let stored: DeleteAgent = env.stored(created.id().unwrap()).await;
    assert!(stored.header.tracking_details.is_some());
}

#[tokio::test]
async fn create_with_migrating_details_is_rejected() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let agent = v1_agent(owner.id().unwrap()).with_migrating_connection(v2_detail(ReleaseState::Ring1));

    let err = env
        .writers
        .agents
        .create(&env.ctx(editor()), agent)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(target(&err), "migratingConnectionDetails");
}

#[tokio::test]
async fn unauthorized_create_touches_nothing() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let before = env.store.len();

    let err = env
        .writers
        .agents
        .create(&env.ctx(outsider()), v1_agent(owner.id().unwrap()))
        .await
        .unwrap_err();

    assert!(matches!(err, WriteError::MissingWritePermission { .. }));
    assert_eq!(env.store.len(), before);
}

#[tokio::test]
async fn service_admin_writes_for_any_owner() {
    let env = TestEnvironment::new();
    let owner = env.seed(owner_with_groups(&[OTHER_GROUP])).await;

    let created = env
        .writers
        .agents
        .create(&env.ctx(admin()), v1_agent(owner.id().unwrap()))
        .await;

    assert!(created.is_ok());
}

#[tokio::test]
async fn unknown_owner_is_a_conflict() {
    let env = TestEnvironment::new();

    let err = env
        .writers
        .agents
        .create(&env.ctx(editor()), v1_agent(EntityId::new()))
        .await
        .unwrap_err();

    assert_eq!(err.conflict_kind(), Some(ConflictKind::DoesNotExist));
    assert_eq!(target(&err), "ownerId");
}

#[tokio::test]
async fn owner_without_write_groups_is_reported_by_validation() {
    let env = TestEnvironment::new();
    let owner = env.seed(owner_with_groups(&[])).await;

    let err = env
        .writers
        .agents
        .create(&env.ctx(editor()), v1_agent(owner.id().unwrap()))
        .await
        .unwrap_err();

    assert_eq!(err.conflict_kind(), Some(ConflictKind::DoesNotExist));
    assert_eq!(target(&err), "dataOwner.writeSecurityGroups");
}

#[tokio::test]
async fn embedded_owner_must_not_be_written() {
    let env = TestEnvironment::new();
    let stored_owner = env.seed_owner().await;
    let mut agent = v1_agent(stored_owner.id().unwrap());
    agent.owner = Some(Box::new(owner()));

    let err = env
        .writers
        .agents
        .create(&env.ctx(editor()), agent)
        .await
        .unwrap_err();

    assert_eq!(target(&err), "owner");
}

#[tokio::test]
async fn duplicate_name_is_rejected_on_create() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    env.seed(v1_agent(owner.id().unwrap())).await;

    let err = env
        .writers
        .agents
        .create(&env.ctx(editor()), v1_agent(owner.id().unwrap()))
        .await
        .unwrap_err();

    assert_eq!(err.conflict_kind(), Some(ConflictKind::AlreadyExists));
    assert_eq!(target(&err), "name");
}

#[tokio::test]
async fn overlapping_live_and_migrating_release_state_is_rejected() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let stored = env.seed(v1_agent(owner.id().unwrap())).await;

    let update = for_update(stored).with_migrating_connection(v2_detail(ReleaseState::PreProd));
    let err = env
        .writers
        .agents
        .update(&env.ctx(editor()), update)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(target(&err), "connectionDetails");
}

#[tokio::test]
async fn same_protocol_migration_always_fails() {
    for protocol in ProtocolId::ALL {
        let env = TestEnvironment::new();
        let owner = env.seed_owner().await;
        let stored = env
            .seed(prod_only_agent(
                owner.id().unwrap(),
                detail_for(protocol, ReleaseState::Prod),
            ))
            .await;

        let update =
            for_update(stored).with_migrating_connection(detail_for(protocol, ReleaseState::PreProd));
        let err = env
            .writers
            .agents
            .update(&env.ctx(editor()), update)
            .await
            .unwrap_err();

        assert!(err.is_validation(), "{protocol}: {err}");
        assert_eq!(target(&err), MIGRATING_PROTOCOL_TARGET, "{protocol}");
    }
}

#[tokio::test]
async fn v1_to_v2_migration_is_accepted() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let stored = env
        .seed(prod_only_agent(owner.id().unwrap(), v1_detail(ReleaseState::Prod)))
        .await;
    let history_before = env.history_len();

    let update = for_update(stored).with_migrating_connection(v2_detail(ReleaseState::PreProd));
    let updated = env
        .writers
        .agents
        .update(&env.ctx(editor()), update)
        .await
        .unwrap();

    let migrating = updated.migrating_connection_details.unwrap();
    assert_eq!(
        migrating[&ReleaseState::PreProd].protocol,
        Some(ProtocolId::CommandFeedV2)
    );
    assert_eq!(env.history_len(), history_before + 1);
}

#[tokio::test]
async fn editors_can_cut_over_roll_back_and_roll_forward_again() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let v1_prod = v1_detail(ReleaseState::Prod);
    let stored = env
        .seed(prod_only_agent(owner.id().unwrap(), v1_prod.clone()))
        .await;
    let ctx = env.ctx(editor());
    let agents = &env.writers.agents;

    let migrating = agents
        .update(&ctx, for_update(stored).with_migrating_connection(v2_detail(ReleaseState::PreProd)))
        .await
        .unwrap();

    let v2_prod = v2_detail(ReleaseState::Prod);
    let cut_over = agents
        .update(&ctx, switch_prod(migrating, v2_prod.clone(), v1_detail(ReleaseState::PreProd)))
        .await
        .unwrap();
    assert_eq!(
        cut_over.connection_details[&ReleaseState::Prod].protocol,
        Some(ProtocolId::CommandFeedV2)
    );

    let rolled_back = agents
        .update(&ctx, switch_prod(cut_over, v1_prod, v2_detail(ReleaseState::PreProd)))
        .await
        .unwrap();
    assert_eq!(
        rolled_back.connection_details[&ReleaseState::Prod].protocol,
        Some(ProtocolId::CommandFeedV1)
    );

    let forward = agents
        .update(&ctx, switch_prod(rolled_back, v2_prod, v1_detail(ReleaseState::PreProd)))
        .await
        .unwrap();
    let stored: DeleteAgent = env.stored(forward.id().unwrap()).await;
    assert_eq!(
        stored.connection_details[&ReleaseState::Prod].protocol,
        Some(ProtocolId::CommandFeedV2)
    );
    assert_eq!(
        stored.migrating_connection_details.unwrap()[&ReleaseState::PreProd].protocol,
        Some(ProtocolId::CommandFeedV1)
    );
}

#[tokio::test]
async fn v1_app_id_list_is_stored_as_sent() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let apps = vec![Uuid::new_v4(), Uuid::new_v4()];
    let prod = ConnectionDetail::new(ReleaseState::Prod)
        .with_protocol(ProtocolId::CommandFeedV1)
        .with_aad_apps(apps.clone());
    let agent = prod_only_agent(owner.id().unwrap(), prod);

    let created = env
        .writers
        .agents
        .create(&env.ctx(editor()), agent)
        .await
        .unwrap();

    let stored: DeleteAgent = env.stored(created.id().unwrap()).await;
    let prod = &stored.connection_details[&ReleaseState::Prod];
    assert_eq!(prod.aad_app_id, None);
    assert_eq!(prod.aad_app_ids, Some(apps));
}

#[tokio::test]
async fn production_connection_is_immutable_for_editors() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let stored = env.seed(v1_agent(owner.id().unwrap())).await;

    let mut update = for_update(stored);
    update.connection_details.insert(ReleaseState::Prod, v1_detail(ReleaseState::Prod));

    let err = env
        .writers
        .agents
        .update(&env.ctx(editor()), update.clone())
        .await
        .unwrap_err();
    assert_eq!(err.conflict_kind(), Some(ConflictKind::Immutable));
    assert_eq!(target(&err), "connectionDetails[Prod]");

    let updated = env.writers.agents.update(&env.ctx(admin()), update).await;
    assert!(updated.is_ok());
}

#[tokio::test]
async fn promoting_prod_requires_an_incident_connector() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let stored = env.seed(v1_agent(owner.id().unwrap())).await;

    let mut update = for_update(stored);
    update.connection_details.get_mut(&ReleaseState::Prod).unwrap().agent_readiness =
        Some(AgentReadiness::ProdReady);

    let err = env
        .writers
        .agents
        .update(&env.ctx(editor()), update)
        .await
        .unwrap_err();
    assert_eq!(err.conflict_kind(), Some(ConflictKind::NullValue));
}

#[tokio::test]
async fn promoting_prod_stamps_in_prod_date() {
    let env = TestEnvironment::new();
    let owner = env.seed(owner().with_icm(Uuid::new_v4())).await;
    let stored = env.seed(v1_agent(owner.id().unwrap())).await;
    let stamped = env.now();

    let mut update = for_update(stored);
    update.connection_details.get_mut(&ReleaseState::Prod).unwrap().agent_readiness =
        Some(AgentReadiness::ProdReady);
    let updated = env
        .writers
        .agents
        .update(&env.ctx(editor()), update)
        .await
        .unwrap();

    assert_eq!(updated.in_prod_date, Some(stamped));
    assert!(env.notifier.events().is_empty());
}

#[tokio::test]
async fn prod_ready_cannot_be_reverted() {
    let env = TestEnvironment::new();
    let stored = seed_prod_ready_agent(&env).await;

    let mut update = for_update(stored);
    update.connection_details.get_mut(&ReleaseState::Prod).unwrap().agent_readiness =
        Some(AgentReadiness::TestInProd);

    let err = env
        .writers
        .agents
        .update(&env.ctx(editor()), update)
        .await
        .unwrap_err();
    assert_eq!(err.conflict_kind(), Some(ConflictKind::Immutable));
    assert_eq!(target(&err), "connectionDetails[Prod].agentReadiness");
}

#[tokio::test]
async fn in_prod_date_is_immutable() {
    let env = TestEnvironment::new();
    let stored = seed_prod_ready_agent(&env).await;

    let mut update = for_update(stored);
    update.in_prod_date = update.in_prod_date.map(|d| d + chrono::Duration::days(1));

    let err = env
        .writers
        .agents
        .update(&env.ctx(admin()), update)
        .await
        .unwrap_err();
    assert_eq!(err.conflict_kind(), Some(ConflictKind::Immutable));
    assert_eq!(target(&err), "inProdDate");
}

#[tokio::test]
async fn new_preprod_connection_is_forced_ready() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let stored = env
        .seed(prod_only_agent(owner.id().unwrap(), v1_detail(ReleaseState::Prod)))
        .await;

    let update = for_update(stored).with_connection(v1_detail(ReleaseState::PreProd));
    let updated = env
        .writers
        .agents
        .update(&env.ctx(editor()), update)
        .await
        .unwrap();

    assert_eq!(
        updated.connection_details[&ReleaseState::PreProd].agent_readiness,
        Some(AgentReadiness::ProdReady)
    );
}

#[tokio::test]
async fn changed_credentials_must_stay_unique() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let stored = env.seed(preprod_agent(owner.id().unwrap())).await;

    let mut update = for_update(stored);
    let prod_app = Uuid::new_v4();
    update.connection_details.insert(
        ReleaseState::Prod,
        ConnectionDetail::new(ReleaseState::Prod)
            .with_protocol(ProtocolId::CommandFeedV1)
            .with_aad_app(prod_app),
    );
    update
        .connection_details
        .get_mut(&ReleaseState::PreProd)
        .unwrap()
        .aad_app_id = Some(prod_app);

    let err = env
        .writers
        .agents
        .update(&env.ctx(editor()), update)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(target(&err), "connectionDetails[PreProd].aadAppId(s)");
}

#[tokio::test]
async fn registration_is_reported_after_commit() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let connector = Uuid::new_v4();

    let created = env
        .writers
        .agents
        .create(&env.ctx(editor()), v1_agent(owner.id().unwrap()).with_icm(connector))
        .await
        .unwrap();

    assert_eq!(
        env.notifier.events(),
        vec![IncidentEvent::AgentRegistered {
            agent_id: created.id().unwrap(),
            owner_id: owner.id(),
            connector_id: connector,
        }]
    );

    let stored: DeleteAgent = env.stored(created.id().unwrap()).await;
    let mut rename = for_update(stored);
    rename.description = "Deletes blobs and queues".into();
    env.writers
        .agents
        .update(&env.ctx(editor()), rename)
        .await
        .unwrap();
    assert_eq!(env.notifier.events().len(), 1);
}

#[tokio::test]
async fn notification_failure_does_not_fail_the_write() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    env.notifier.fail();

    let created = env
        .writers
        .agents
        .create(
            &env.ctx(editor()),
            v1_agent(owner.id().unwrap()).with_icm(Uuid::new_v4()),
        )
        .await;

    assert!(created.is_ok());
    assert_eq!(env.notifier.events().len(), 1);
}

#[tokio::test]
async fn stale_etag_is_a_conflict_and_casing_is_ignored() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let stored = env.seed(v1_agent(owner.id().unwrap())).await;
    let current = stored.header.e_tag.clone().unwrap();

    let mut stale = for_update(stored.clone());
    stale.header.e_tag = Some(ETag::new("\"0000\""));
    let err = env
        .writers
        .agents
        .update(&env.ctx(editor()), stale)
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::ETagMismatch { .. }));

    let mut relaxed = for_update(stored);
    relaxed.header.e_tag = Some(ETag::new(current.as_str().to_lowercase()));
    relaxed.description = "Deletes blobs and tables".into();
    assert!(env
        .writers
        .agents
        .update(&env.ctx(editor()), relaxed)
        .await
        .is_ok());
}

#[tokio::test]
async fn update_of_unknown_agent_is_not_found() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let mut agent = v1_agent(owner.id().unwrap());
    agent.header.id = Some(EntityId::new());
    agent.header.e_tag = Some(ETag::new("\"1\""));

    let err = env
        .writers
        .agents
        .update(&env.ctx(editor()), agent)
        .await
        .unwrap_err();
    assert!(matches!(err, WriteError::NotFound { .. }));
}

#[tokio::test]
async fn pending_commands_block_delete_unless_overridden() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let stored = env.seed(v1_agent(owner.id().unwrap())).await;
    let id = stored.id().unwrap();
    let etag = stored.header.e_tag.clone().unwrap();
    env.model.mark_pending_commands(id);

    let err = env
        .writers
        .agents
        .delete(&env.ctx(editor()), id, &etag, DeleteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.conflict_kind(), Some(ConflictKind::PendingCommands));

    let options = DeleteOptions {
        override_pending_commands: true,
        force: false,
    };
    env.writers
        .agents
        .delete(&env.ctx(editor()), id, &etag, options)
        .await
        .unwrap();

    let deleted: DeleteAgent = env.stored(id).await;
    assert!(deleted.header.is_deleted);
    assert_eq!(
        env.notifier.events(),
        vec![IncidentEvent::AgentDeleted {
            agent_id: id,
            override_pending_commands: true,
            force: false,
        }]
    );
}

#[tokio::test]
async fn deleted_agent_cannot_be_deleted_again() {
    let env = TestEnvironment::new();
    let owner = env.seed_owner().await;
    let stored = env.seed(v1_agent(owner.id().unwrap())).await;
    let id = stored.id().unwrap();

    env.writers
        .agents
        .delete(
            &env.ctx(editor()),
            id,
            stored.header.e_tag.as_ref().unwrap(),
            DeleteOptions::default(),
        )
        .await
        .unwrap();

    let deleted: DeleteAgent = env.stored(id).await;
    let err = env
        .writers
        .agents
        .delete(
            &env.ctx(editor()),
            id,
            deleted.header.e_tag.as_ref().unwrap(),
            DeleteOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.conflict_kind(), Some(ConflictKind::InvalidState));
    assert_eq!(target(&err), "isDeleted");
}
