use clap::{Parser, Subcommand};
use telemetry_store::{
    config::{StorageConfig, read_config_file},
    storage::{SnapshotReader, StorageBackend, StorageFacade},
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Open the configured storage and keep it running until Ctrl-C
    Serve,

    /// Print every stored metric as JSON
    Dump,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![("telemetry_store", LevelFilter::DEBUG)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let storage_config = match &args.config {
        Some(path) => read_config_file(path)?.storage.unwrap_or_default(),
        None => StorageConfig::default(),
    };

    match args.command {
        Command::Serve => serve(&storage_config).await,
        Command::Dump => dump(&storage_config).await,
    }
}

async fn serve(config: &StorageConfig) -> anyhow::Result<()> {
    let storage = StorageFacade::open(config).await?;
    storage.ping().await?;

    let count = storage.get_all().await?.len();
    info!(
        "serving {} storage with {} metrics, press Ctrl-C to stop",
        storage.backend_name(),
        count
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    if let Err(e) = storage.close().await {
        error!("final flush failed: {e}");
        return Err(e.into());
    }
    Ok(())
}

async fn dump(config: &StorageConfig) -> anyhow::Result<()> {
    let mut records = match config {
        // Read the file directly, opening the store would rewrite it on close
        StorageConfig::File { path, .. } => SnapshotReader::new(path).read_file().await?,
        _ => {
            let storage = StorageFacade::open(config).await?;
            let metrics = storage.get_all().await?;
            storage.close().await?;
            metrics.into_values().collect()
        }
    };
    records.sort_by(|a, b| a.id.cmp(&b.id));

    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
