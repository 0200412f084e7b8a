use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use keeper_broker::config::KeeperConfig;
use keeper_broker::telemetry;

#[derive(Parser)]
#[command(name = "keeper-broker", version, about = "Multi-tenant secret vault server")]
struct BrokerArgs {
    /// Path to a TOML config file
    #[arg(long, env = "KEEPER_CONFIG")]
    config: Option<PathBuf>,
    /// Override bind address
    #[arg(long)]
    bind: Option<String>,
    /// Storage backend (memory or postgres)
    #[arg(long)]
    storage: Option<String>,
    /// PostgreSQL connection URL
    #[arg(long)]
    database_url: Option<String>,
    /// Log format (json or pretty)
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = real_main().await {
        eprintln!("keeper-broker exited with error: {err:#}");
        process::exit(1);
    }
}

async fn real_main() -> anyhow::Result<()> {
    let args = BrokerArgs::parse();
    let mut config = KeeperConfig::load(args.config.as_deref())?;
    apply_args(&mut config, &args)?;
    config.validate().context("invalid configuration")?;

    telemetry::init(config.telemetry.log_format)?;
    tracing::info!(
        bind = %config.server.bind,
        storage = ?config.storage.backend,
        blob = ?config.blob.backend,
        "starting keeper-broker"
    );

    keeper_broker::run(config).await
}

fn apply_args(config: &mut KeeperConfig, args: &BrokerArgs) -> anyhow::Result<()> {
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(storage) = &args.storage {
        config.storage.backend = storage.parse()?;
    }
    if let Some(url) = &args.database_url {
        config.storage.database_url = Some(url.clone());
    }
    if let Some(format) = &args.log_format {
        config.telemetry.log_format = format.parse()?;
    }
    Ok(())
}
