//! `steward` command line
//!
//! Offline validation of delete agent documents, the migration table, and a
//! demo run of the full write pipeline over the in-memory store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use steward_core::prelude::*;
use steward_core::{init_logging, LoggingNotifier, StaticGroupDirectory};
use steward_model::{AgentReadiness, AssetGroupVariant, VariantReason, VariantState};
use steward_store::{DocumentKind, InMemoryDocumentStore, SystemClock, TransactionalStorageWriter};
use steward_validation::connection::normalize;
use steward_validation::{ConnectionValidator, EntityRuleValidator, MigrationTable, MigrationValidator};
use uuid::Uuid;

fn cli() -> Command {
    Command::new("steward")
        .version(steward_core::VERSION)
        .about("Entity write pipeline for delete agents, owners, variants and asset groups")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML writer configuration"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .help("Level for steward targets when RUST_LOG is unset"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("validate-agent")
                .about("Check a delete agent JSON document without storing it")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Delete agent document"),
                )
                .arg(
                    Arg::new("action")
                        .long("action")
                        .default_value("create")
                        .value_parser(["create", "update"])
                        .help("Write the document is checked for"),
                ),
        )
        .subcommand(Command::new("migration-table").about("List the allowed protocol migrations"))
        .subcommand(
            Command::new("demo")
                .about("Run owner, agent, variant and asset group writes against an in-memory store"),
        )
}

fn load_config(matches: &ArgMatches) -> Result<WriterConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => WriterConfig::from_file(path)?,
        None => WriterConfig::default(),
    };
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level.clone_from(level);
    }
    if matches.get_flag("json-logs") {
        config.logging.json = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    init_logging(&config.logging).context("failed to install log subscriber")?;

    match matches.subcommand() {
        Some(("validate-agent", args)) => {
            let path = args
                .get_one::<PathBuf>("file")
                .context("missing agent document path")?;
            let action = match args.get_one::<String>("action").map(String::as_str) {
                Some("update") => WriteAction::Update,
                _ => WriteAction::Create,
            };
            if !validate_agent(&config, path, action)? {
                std::process::exit(2);
            }
        }
        Some(("migration-table", _)) => print_migration_table(),
        Some(("demo", _)) => run_demo(config).await?,
        Some((other, _)) => bail!("unknown command '{other}'"),
        None => bail!("no command given"),
    }
    Ok(())
}

/// Stateless checks only; uniqueness and owner lookups need a store
fn validate_agent(config: &WriterConfig, path: &Path, action: WriteAction) -> Result<bool> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let mut agent: DeleteAgent =
        serde_json::from_str(&source).context("document is not a delete agent")?;

    normalize(&mut agent.connection_details);
    if let Some(migrating) = agent.migrating_connection_details.as_mut() {
        normalize(migrating);
    }

    let connections = ConnectionValidator::new(config.delete_agent.clone());
    let migrations = MigrationValidator::new(MigrationTable::STANDARD, connections.clone());
    let outcome = EntityRuleValidator::new()
        .validate(action, &agent)
        .and_then(|()| connections.validate_details("connectionDetails", &agent.connection_details))
        .and_then(|()| migrations.validate(action, &agent));

    match outcome {
        Ok(()) => {
            println!("{}", serde_json::to_string_pretty(&agent)?);
            Ok(true)
        }
        Err(error) => {
            report(&error);
            Ok(false)
        }
    }
}

fn report(error: &WriteError) {
    eprintln!("rejected: {error}");
    if let Some(target) = error.target() {
        eprintln!("  target: {target}");
    }
    if let Some(kind) = error.conflict_kind() {
        eprintln!("  conflict: {kind}");
    }
}

fn print_migration_table() {
    println!("Allowed protocol migrations");
    println!("===========================");
    for protocol in ProtocolId::ALL {
        let targets = MigrationTable::STANDARD.targets_of(protocol);
        if targets.is_empty() {
            println!("  {protocol}: none");
        } else {
            let targets: Vec<String> = targets.iter().map(ToString::to_string).collect();
            println!("  {protocol} -> {}", targets.join(", "));
        }
    }
}

async fn run_demo(config: WriterConfig) -> Result<()> {
    let team_group = Uuid::new_v4();
    let operations_group = Uuid::new_v4();
    let operator = PrincipalId::new("operator@contoso.com");

    let config = config
        .with_service_admin_group(operations_group)
        .with_variant_editor_group(operations_group);

    let directory = Arc::new(StaticGroupDirectory::new());
    directory.grant(operator.clone(), team_group);
    directory.grant(operator.clone(), operations_group);

    let store = Arc::new(InMemoryDocumentStore::new());
    let model = Arc::new(MemoryReadModel::new(store.clone()));
    let services = WriterServices {
        readers: Readers::in_memory(&model),
        authorization: Arc::new(AuthorizationGate::from_config(directory, &config)),
        storage: Arc::new(TransactionalStorageWriter::new(store.clone())),
        notifier: Arc::new(LoggingNotifier),
        clock: Arc::new(SystemClock),
    };
    let writers = Writers::new(&config, services);
    let ctx = WriteContext::new(operator);

    let mut owner = DataOwner::new("Contoso Storage", "Owns the storage delete agents")
        .with_write_security_group(team_group);
    owner.alert_contacts = vec!["storage-oncall@contoso.com".to_string()];
    let owner = writers.owners.create(&ctx, owner).await?;
    let owner_id = owner.id().context("created owner has no id")?;
    println!("owner      {owner_id}  {}", owner.name);

    let agent = DeleteAgent::new("Blob Delete Agent", "Deletes blobs for the storage team")
        .with_owner_id(owner_id)
        .with_connection(
            ConnectionDetail::new(ReleaseState::PreProd)
                .with_protocol(ProtocolId::CommandFeedV2)
                .with_aad_apps(vec![Uuid::new_v4()])
                .with_readiness(AgentReadiness::TestInProd),
        );
    let agent = writers.agents.create(&ctx, agent).await?;
    let agent_id = agent.id().context("created agent has no id")?;
    println!("agent      {agent_id}  {}", agent.name);

    let variant = writers
        .variants
        .create(&ctx, VariantDefinition::new("Legal Hold", "Data retained for litigation"))
        .await?;
    let variant_id = variant.id().context("created variant has no id")?;
    println!("variant    {variant_id}  {}", variant.name);

    let group = AssetGroup::new("AssetType=AzureBlob;AccountName=storage1")
        .with_owner_id(owner_id)
        .with_delete_agent_id(agent_id);
    let mut group = writers.asset_groups.create(&ctx, group).await?;
    group.variants.push(AssetGroupVariant::new(variant_id));
    let group = writers.asset_groups.update(&ctx, group).await?;
    println!("group      {}  {} variant(s)", display_id(group.id()), group.variants.len());

    let mut variant = variant;
    variant.state = VariantState::Closed;
    variant.reason = VariantReason::Intentional;
    let variant = writers.variants.update(&ctx, variant).await?;
    let etag = variant
        .header
        .e_tag
        .clone()
        .context("updated variant has no etag")?;
    writers
        .variants
        .delete(&ctx, variant_id, &etag, DeleteOptions::forced())
        .await?;
    println!("variant    {variant_id}  force deleted");

    let remaining = store.documents(DocumentKind::Entity).len();
    let history = store.documents(DocumentKind::History).len();
    println!();
    println!("entities: {remaining}");
    println!("history:  {history}");
    Ok(())
}

fn display_id(id: Option<EntityId>) -> String {
    id.map_or_else(|| "-".to_string(), |id| id.to_string())
}
