// SPDX-License-Identifier: AGPL-3.0-or-later
//! cassandra-services: reconcile the supplementary services of a Cassandra cluster

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

use cassandra_services::{
    credentials::{create_keyspace, ReplicationDescriptor},
    memory::{InMemoryBackend, MemorySnapshotStore, DEFAULT_NAMESPACE},
    pipeline::PipelineOutcome,
    snapshot::{ChangeSet, FileSnapshotStore, SnapshotStore, SpecSnapshot},
    CassandraServices, Config, ExecutionContext, Reconciler,
};

/// cassandra-services: supplementary services operator
///
/// Decides which service pipelines a resource change requires and runs them
/// against an in-memory cluster to show what a pass would do.
#[derive(Parser, Debug)]
#[command(name = "cassandra-services")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "cassandra-services.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show what changed since the last applied configuration
    Diff {
        /// Path to the resource file (YAML or JSON)
        resource: PathBuf,
    },

    /// Show the pipelines a pass would build, without running them
    Plan {
        /// Path to the resource file (YAML or JSON)
        resource: PathBuf,
    },

    /// Run a full pass against an in-memory cluster
    #[command(alias = "sim")]
    Simulate {
        /// Path to the resource file (YAML or JSON)
        resource: PathBuf,

        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record the resource as the last applied configuration
    Commit {
        /// Path to the resource file (YAML or JSON)
        resource: PathBuf,
    },

    /// Show the SSH keyspace replication for a resource
    Replication {
        /// Path to the resource file (YAML or JSON)
        resource: PathBuf,
    },

    /// Show configuration
    Config,

    /// Initialize a new configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(&cli.config).unwrap_or_default();
    init_logging(&cli, &config)?;

    match cli.command {
        Commands::Version => {
            println!("cassandra-services v{}", env!("CARGO_PKG_VERSION"));
            println!("Supplementary services operator for Cassandra");
            Ok(())
        }

        Commands::Init { force } => init_config(&cli.config, force).await,

        Commands::Config => show_config(&cli.config).await,

        Commands::Diff { resource } => show_diff(&cli.config, &resource).await,

        Commands::Plan { resource } => show_plan(&cli.config, &resource).await,

        Commands::Simulate { resource, json } => simulate(&cli.config, &resource, json).await,

        Commands::Commit { resource } => commit(&cli.config, &resource).await,

        Commands::Replication { resource } => show_replication(&resource),
    }
}

/// Log directive: command-line flags win over the configured level
fn log_directive<'a>(cli: &Cli, config: &'a Config) -> &'a str {
    if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        config.logging.level.as_str()
    }
}

fn init_logging(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(log_directive(cli, config))
        .with_context(|| format!("Invalid log level '{}'", config.logging.level))?;

    let writer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.debug)
        .with_writer(writer);
    if config.logging.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(())
}

/// Context on the in-memory backend with the configured retry budget
fn simulation_context(
    backend: &InMemoryBackend,
    resource: CassandraServices,
    namespace: &str,
    config: &Config,
) -> ExecutionContext {
    backend
        .context(Arc::new(resource), namespace)
        .with_retry(config.retry_settings())
}

fn load_config(config_path: &Path) -> anyhow::Result<Config> {
    Config::load_or_default(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))
}

fn load_resource(resource_path: &Path) -> anyhow::Result<CassandraServices> {
    CassandraServices::from_file(resource_path)
        .with_context(|| format!("Failed to load resource: {}", resource_path.display()))
}

/// Namespace of the resource, falling back to the configured one
fn namespace_of(resource: &CassandraServices, config: &Config) -> String {
    match resource.metadata.namespace.as_deref() {
        Some(namespace) if !namespace.is_empty() => namespace.to_string(),
        _ if !config.namespace.is_empty() => config.namespace.clone(),
        _ => DEFAULT_NAMESPACE.to_string(),
    }
}

/// Initialize a new configuration file
async fn init_config(config_path: &Path, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let default_config = r#"# SPDX-License-Identifier: AGPL-3.0-or-later
# cassandra-services configuration

name = "cassandra-services"
namespace = "cassandra"
# Last applied configuration snapshots are kept here
state_dir = "state"

[retry]
# Attempts per database pod when installing SSH keys
tries_count = 5
retry_timeout_secs = 10

[logging]
level = "info"
format = "text"
# file = "/var/log/cassandra-services.log"
"#;

    tokio::fs::write(config_path, default_config)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    info!("Created configuration file: {}", config_path.display());
    println!("Created configuration file: {}", config_path.display());
    Ok(())
}

/// Show the current configuration
async fn show_config(config_path: &Path) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("No configuration file found. Using defaults:");
        println!();
        println!("{}", toml::to_string_pretty(&Config::default())?);
        return Ok(());
    }

    let config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn print_changes(changes: &ChangeSet) {
    if changes.is_empty() {
        println!("No changes since the last applied configuration");
        return;
    }

    println!("Changes since the last applied configuration:");
    println!();
    if changes.common_changed {
        println!("  Common fields: {}", changes.changed_fields.join(", "));
    }
    for service in &changes.changed_services {
        println!("  Service: {}", service);
    }
}

/// Compare a resource against the last applied snapshot
async fn show_diff(config_path: &Path, resource_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let resource = load_resource(resource_path)?;
    let store = FileSnapshotStore::new(config.snapshot_path());

    let previous = store
        .load()
        .await
        .with_context(|| format!("Failed to read snapshot {}", store.path().display()))?;
    if previous.is_none() {
        println!("No snapshot at {}, first pass", store.path().display());
    }

    let changes = ChangeSet::detect(&resource.spec, previous.as_ref())?;
    print_changes(&changes);
    Ok(())
}

/// Build the pipelines and list their steps
async fn show_plan(config_path: &Path, resource_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let resource = load_resource(resource_path)?;
    let namespace = namespace_of(&resource, &config);

    let backend = InMemoryBackend::seeded(&resource).await;
    let mut ctx = simulation_context(&backend, resource, &namespace, &config);
    let reconciler = Reconciler::new(Arc::new(FileSnapshotStore::new(config.snapshot_path())));

    let plan = reconciler.plan(&mut ctx).await?;

    println!("Plan for namespace {}:", namespace);
    println!();
    for pipeline in plan {
        if pipeline.skipped {
            println!("  {} (not installed)", pipeline.service);
        } else if !pipeline.runs {
            println!("  {} [{}] unchanged", pipeline.service, pipeline.deploy_type);
        } else {
            println!("  {} [{}]", pipeline.service, pipeline.deploy_type);
            for step in &pipeline.steps {
                println!("    - {}", step);
            }
        }
    }

    Ok(())
}

/// Run a pass against an in-memory cluster
async fn simulate(config_path: &Path, resource_path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let resource = load_resource(resource_path)?;
    let namespace = namespace_of(&resource, &config);

    let previous = FileSnapshotStore::new(config.snapshot_path()).load().await?;
    let store = match previous {
        Some(snapshot) => MemorySnapshotStore::with_snapshot(snapshot),
        None => MemorySnapshotStore::new(),
    };

    let backend = InMemoryBackend::seeded(&resource).await;
    let mut ctx = simulation_context(&backend, resource, &namespace, &config);
    let reconciler = Reconciler::new(Arc::new(store));

    let report = match reconciler.reconcile(&mut ctx).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Simulated pass failed");
            return Err(e).context("Simulated pass failed");
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Simulated pass completed");
    println!();
    for pipeline in &report.pipelines {
        let outcome = match pipeline.outcome {
            PipelineOutcome::Skipped => "skipped",
            PipelineOutcome::Unchanged => "unchanged",
            PipelineOutcome::Completed => "completed",
        };
        println!("  {} [{}]: {}", pipeline.service, pipeline.deploy_type, outcome);
        for step in pipeline.steps.iter().filter(|step| step.ran) {
            println!("    - {} ({} ms)", step.name, step.duration_ms);
        }
    }
    println!();
    println!("  Duration: {} ms", report.total_duration_ms);
    println!(
        "  Remote commands: {}",
        backend.cluster.exec_log().await.len()
    );

    Ok(())
}

/// Record the resource as applied without running a pass
async fn commit(config_path: &Path, resource_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let resource = load_resource(resource_path)?;
    let store = FileSnapshotStore::new(config.snapshot_path());

    let snapshot = SpecSnapshot::capture(&resource.spec)?;
    store
        .save(&snapshot)
        .await
        .with_context(|| format!("Failed to write snapshot {}", store.path().display()))?;

    println!("Recorded last applied configuration: {}", store.path().display());
    Ok(())
}

/// Print the replication descriptor and the keyspace statement
fn show_replication(resource_path: &Path) -> anyhow::Result<()> {
    let resource = load_resource(resource_path)?;
    let descriptor = ReplicationDescriptor::from_spec(&resource.spec)
        .context("Failed to compute keyspace replication")?;

    println!("Replication: {}", descriptor);
    println!("{}", create_keyspace(&descriptor));
    Ok(())
}
