use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::chain::Chain;
use crate::error::Error;
use crate::script::ScriptMask;
use crate::serve::{AppState, DEFAULT_BIND_API};
use crate::store::Store;
use crate::store::rocks::RocksStore;
use crate::sync::history::BlockHistory;
use crate::sync::indexer::Indexer;
use crate::sync::walker::{Walker, WalkerConfig};

pub use store::encdec::{DecodingError, DecodingResult};

mod chain;
mod error;
mod script;
mod serve;
mod shutdown;
mod store;
mod sync;

#[derive(Debug, Subcommand)]
enum Command {
    /// Follow the chain and maintain the index.
    Sync(SyncArgs),
    /// Serve the read API over an existing database.
    Serve(ServeArgs),
    /// Sync and serve in one process.
    Run(RunArgs),
}

#[derive(Debug, clap::Args)]
pub struct SyncArgs {}

#[derive(Debug, clap::Args)]
pub struct ServeArgs {}

#[derive(Debug, clap::Args)]
pub struct RunArgs {}

#[derive(Debug, Parser)]
#[clap(name = "utxo-indexer")]
#[clap(bin_name = "utxo-indexer")]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Optional config file; environment variables take precedence.
    config: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub rpc_host: String,
    pub rpc_port: Option<u16>,
    pub rpc_user: String,
    pub rpc_pass: String,
    pub zmq_host: Option<String>,
    pub zmq_port: u16,
    pub bind_api: String,
    pub cors_origin: Option<String>,
    pub chain: Chain,
    /// Fallback when the store carries no resume cursor yet.
    pub starting_height: u64,
    pub trim_spent_after: u64,
    pub trim_interval_blocks: u64,
    pub poll_seconds: u64,
    pub script_mask: String,
}

impl Config {
    pub fn new(config_path: &Option<PathBuf>) -> Result<Self, config::ConfigError> {
        let mut s = config::Config::builder();

        s = s.add_source(config::File::with_name("indexer.toml").required(false));

        if let Some(explicit) = config_path.as_ref().and_then(|x| x.to_str()) {
            s = s.add_source(config::File::with_name(explicit).required(true));
        }

        s = s.add_source(config::Environment::default());

        s = s
            .set_default("db_url", "index.db")?
            .set_default("rpc_host", "127.0.0.1")?
            .set_default("rpc_user", "dogecoin")?
            .set_default("rpc_pass", "dogecoin")?
            .set_default("zmq_port", 28332)?
            .set_default("bind_api", DEFAULT_BIND_API)?
            .set_default("chain", "mainnet")?
            .set_default("starting_height", 0)?
            .set_default("trim_spent_after", 100)?
            .set_default("trim_interval_blocks", 100)?
            .set_default("poll_seconds", 2)?
            .set_default("script_mask", "standard")?;

        s.build()?.try_deserialize()
    }

    pub fn rpc_port(&self) -> u16 {
        self.rpc_port.unwrap_or(self.chain.default_rpc_port())
    }

    pub fn script_mask(&self) -> Result<ScriptMask, Error> {
        self.script_mask.parse().map_err(Error::Config)
    }

    pub fn cors_origin(&self) -> String {
        self.cors_origin.clone().unwrap_or_else(|| "*".into())
    }

    fn walker_config(&self) -> WalkerConfig {
        WalkerConfig {
            rpc_host: self.rpc_host.clone(),
            rpc_port: self.rpc_port(),
            rpc_user: self.rpc_user.clone(),
            rpc_pass: self.rpc_pass.clone(),
            poll_interval: std::time::Duration::from_secs(self.poll_seconds),
            starting_height: self.starting_height,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Cli::parse();

    let config = match Config::new(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Command::Sync(_) => run_sync(config, false).await,
        Command::Serve(_) => run_serve(config).await,
        Command::Run(_) => run_sync(config, true).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Indexing mode, optionally with the read API in the same process.
async fn run_sync(config: Config, with_api: bool) -> Result<(), Error> {
    let store = Arc::new(RocksStore::open(PathBuf::from(&config.db_url), false)?);
    let shutdown = shutdown::shutdown_signal();
    let history = Arc::new(BlockHistory::new());
    let script_mask = config.script_mask()?;

    if let Some(zmq_host) = &config.zmq_host {
        // tip notifications are not transported; the walker polls instead
        info!(
            "ignoring zmq endpoint {}:{}; polling every {}s",
            zmq_host, config.zmq_port, config.poll_seconds
        );
    }

    let resume = store.get_resume_point()?;
    info!(
        "indexing {:?} from {}",
        config.chain,
        resume
            .map(|p| format!("resume height {}", p.height))
            .unwrap_or_else(|| format!("starting height {}", config.starting_height)),
    );

    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let walker = Walker::new(config.walker_config(), resume, events_tx, shutdown.clone())?;
    let indexer = Indexer::new(
        store.clone(),
        events_rx,
        script_mask,
        config.trim_spent_after,
        config.trim_interval_blocks,
        history.clone(),
        shutdown.clone(),
    );

    let walker_task = tokio::spawn(walker.run());
    let indexer_task = tokio::spawn(indexer.run());

    if with_api {
        let state = AppState {
            store: store.clone(),
            history,
            cors_origin: config.cors_origin(),
        };

        serve::run(state, &config.bind_api, shutdown.clone()).await?;
    } else {
        let mut shutdown = shutdown.clone();
        let _ = shutdown.wait_for(|stop| *stop).await;
    }

    let _ = walker_task.await;
    let _ = indexer_task.await;

    info!("finished.");
    Ok(())
}

/// Read-only API mode over a database another process is writing.
async fn run_serve(config: Config) -> Result<(), Error> {
    let store = Arc::new(RocksStore::open(PathBuf::from(&config.db_url), true)?);
    let shutdown = shutdown::shutdown_signal();

    let state = AppState {
        store,
        history: Arc::new(BlockHistory::new()),
        cors_origin: config.cors_origin(),
    };

    serve::run(state, &config.bind_api, shutdown).await?;

    info!("finished.");
    Ok(())
}
