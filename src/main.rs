use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use traceability_engine::alert::LogAlertService;
use traceability_engine::config::EngineConfig;
use traceability_engine::logstore::FileLogStore;
use traceability_engine::model::LogType;
use traceability_engine::replica::HttpReplicaClient;
use traceability_engine::run::{verify_package, RunContext, RunPackage, TraceabilityEngine};
use traceability_engine::tsa::{
    HttpTimestampAuthority, LocalTimestampAuthority, TimestampAuthority, TimestampSigner,
};

#[derive(Parser)]
#[command(name = "traceability-engine")]
#[command(about = "Secure append-only audit trails with Merkle commitments and timestamped chaining")]
struct Cli {
    /// Tenant the run operates for
    #[arg(long, default_value_t = 0)]
    tenant: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build one traceability run for a log type
    Secure {
        /// Log type to secure (operation, unit, objectgroup, storage)
        #[arg(long)]
        log_type: String,
    },
    /// Verify a persisted run package
    Verify {
        /// Run identifier under the package root
        #[arg(long)]
        run_id: String,
    },
    /// Generate a local signing keystore for the timestamp authority
    InitKeystore {
        /// Destination keystore file
        #[arg(long)]
        path: PathBuf,
        /// Certificate subject
        #[arg(long, default_value = "traceability-authority")]
        subject: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "traceability_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::InitKeystore { path, subject } => {
            let signer = TimestampSigner::generate(&subject);
            signer.write_keystore(&path)?;
            info!("Keystore written to {}", path.display());
            return Ok(());
        }
        Command::Secure { log_type } => {
            let config = EngineConfig::load()?;
            config.validate()?;
            let log_type: LogType = log_type.parse().map_err(|e: String| anyhow!(e))?;

            let engine = build_engine(&config)?;
            let ctx = RunContext::new(cli.tenant);
            let report = engine.secure(&ctx, log_type).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Verify { run_id } => {
            let config = EngineConfig::load()?;
            let package = RunPackage::open(&config.package_root, &run_id)
                .context("Could not open run package")?;
            let report = verify_package(&package);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn build_engine(config: &EngineConfig) -> Result<TraceabilityEngine> {
    let timeout = Duration::from_secs(config.request_timeout_secs);

    let store = Arc::new(FileLogStore::new(&config.store_root)?);

    let replica_base_url = config
        .replica_base_url
        .clone()
        .ok_or_else(|| anyhow!("replica_base_url is not configured"))?;
    let replicas = Arc::new(HttpReplicaClient::new(replica_base_url, timeout)?);

    let authority: Arc<dyn TimestampAuthority> = match &config.authority_url {
        Some(url) => Arc::new(HttpTimestampAuthority::new(url.clone(), timeout)?),
        None => {
            let keystore = config
                .keystore_path
                .as_ref()
                .ok_or_else(|| anyhow!("neither authority_url nor keystore_path configured"))?;
            Arc::new(LocalTimestampAuthority::new(TimestampSigner::from_keystore(
                keystore,
            )?))
        }
    };

    Ok(TraceabilityEngine::new(
        store,
        replicas,
        authority,
        Arc::new(LogAlertService),
        config.clone(),
    ))
}
