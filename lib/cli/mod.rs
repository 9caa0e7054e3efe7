use std::path::PathBuf;

use clap::Parser;

use crate::config::DEFAULT_SETTINGS_FILE;
use crate::run_lock::DEFAULT_LOCK_FILE;
use crate::server::monitoring::VERSION;
use crate::sync_service::types::DEFAULT_BATCH_SIZE;

#[derive(Parser, Debug, Clone)]
#[command(
    about = "Mirror namecoin d/ names into a CouchDB database",
    version = VERSION
)]
pub struct Cli {
    #[arg(long)]
    /// Verbose logging and a 60 s lock staleness window
    pub debug: bool,

    #[arg(long = "settings", default_value = DEFAULT_SETTINGS_FILE)]
    /// JSON settings file with node `host`, `port`, `user` and `pass`
    pub settings: PathBuf,

    #[arg(long = "config")]
    /// Node config file (default: ~/.namecoin/namecoin.conf)
    pub node_conf: Option<PathBuf>,

    #[arg(long = "rpc-host")]
    pub rpc_host: Option<String>,
    #[arg(long = "rpc-port")]
    pub rpc_port: Option<u16>,
    #[arg(long = "rpc-user")]
    pub rpc_user: Option<String>,
    #[arg(long = "rpc-password")]
    pub rpc_password: Option<String>,

    #[arg(long = "store-url")]
    /// CouchDB server URL (env: STORE_URL)
    pub store_url: Option<String>,
    #[arg(long = "store-db")]
    /// Database name (env: STORE_DB)
    pub store_db: Option<String>,

    #[arg(long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE)]
    /// Names per node page and per batch write
    pub batch_size: u64,

    #[arg(long = "lock-file", default_value = DEFAULT_LOCK_FILE)]
    pub lock_file: PathBuf,

    #[arg(long = "node-rps")]
    /// Node request budget per second (env: NODE_RPS)
    pub node_rps: Option<u32>,

    #[arg(long = "metrics-bind")]
    /// Serve /health and /metrics on this address while the run is in progress
    pub metrics_bind: Option<String>,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
