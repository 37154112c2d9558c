// tessera/node/src/main.rs

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tessera_execution::{
    init_system_tables, BlockScheduler, Hash, MemoryLedger, TransactionExecutor,
};
use tessera_primitives::TwoPCParams;
use tessera_storage::{MemoryStorage, RocksStorage, StorageInterface};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod replay;

use config::NodeConfig;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera transaction executor node")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Keep state in memory only
    #[arg(long)]
    in_memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and the system tables
    Init {
        /// Also write the effective configuration to this file
        #[arg(long, value_name = "FILE")]
        write_config: Option<PathBuf>,
    },

    /// Execute and commit the blocks in a JSON block file
    Replay {
        /// Block file
        file: PathBuf,

        /// Print Prometheus metrics after the last block
        #[arg(long)]
        metrics: bool,
    },

    /// Show the schema of a table
    Desc {
        /// Table name or absolute path
        table: String,
    },

    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if cli.in_memory {
        config.storage.in_memory = true;
    }
    config.validate().map_err(|e| anyhow!(e))?;

    let log_config = logging::LogConfig::resolve(&config.logging);
    if let Err(e) = logging::init_logging(&log_config) {
        // Fallback to basic logging if structured logging fails
        eprintln!("Warning: Failed to initialize structured logging: {}", e);
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("info"))
            .init();
    }

    match cli.command {
        Commands::Init { write_config } => {
            open_storage(&config).await?;
            if let Some(path) = write_config {
                config.save(&path)?;
                info!("Wrote configuration to {}", path.display());
            }
            info!("Initialized {}", storage_label(&config));
        }
        Commands::Replay { file, metrics } => {
            let blocks = replay::load_blocks(&file)?;
            let scheduler = BlockScheduler::new(Arc::new(executor(&config).await?));
            let lines = replay::replay(&scheduler, &blocks, Hash::default()).await?;
            for line in &lines {
                println!("{}", serde_json::to_string(line)?);
            }
            info!("Replayed {} blocks, {} receipts", blocks.len(), lines.len());
            if metrics {
                print!("{}", tessera_execution::metrics::render());
            }
        }
        Commands::Desc { table } => {
            let executor = executor(&config).await?;
            let path = if table.starts_with('/') {
                table
            } else {
                tessera_execution::precompiles::utilities::user_table_path(&table)
            };
            match executor.get_table_info(&path).await? {
                Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
                None => return Err(anyhow!("table {} does not exist", path)),
            }
        }
        Commands::ShowConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn storage_label(config: &NodeConfig) -> String {
    if config.storage.in_memory {
        "in-memory storage".to_string()
    } else {
        format!("storage at {}", config.storage.data_dir.display())
    }
}

/// Opens the configured backend with the system tables in place. A block left
/// staged by an interrupted run is rolled back.
async fn open_storage(config: &NodeConfig) -> Result<Arc<dyn StorageInterface>> {
    let storage: Arc<dyn StorageInterface> = if config.storage.in_memory {
        Arc::new(MemoryStorage::new())
    } else {
        std::fs::create_dir_all(&config.storage.data_dir)?;
        let rocks = RocksStorage::open(config.storage.data_dir.join("state"))?;
        if let Some(number) = rocks.prepared_block() {
            warn!("Rolling back block {} staged by an earlier run", number);
            rocks.rollback(&TwoPCParams::new(number)).await?;
        }
        Arc::new(rocks)
    };
    init_system_tables(storage.as_ref()).await?;
    Ok(storage)
}

async fn executor(config: &NodeConfig) -> Result<TransactionExecutor> {
    let storage = open_storage(config).await?;
    info!("Using {}", storage_label(config));
    Ok(TransactionExecutor::new(
        config.executor.clone(),
        storage,
        Arc::new(MemoryLedger::new()),
    ))
}
