use crate::{
    cli::Cli,
    config::{default_node_conf_path, resolve_node_config, Config, NodeRpcConfig},
    logging::{format_error_report, init_logging},
    node_client::{rpc::build_rate_limiter, JsonRpcNode, NameNode},
    run_lock::{LockError, RunLock, DEBUG_STALE_AFTER, STALE_AFTER},
    server::setup_server_with_addr,
    state::AppState,
    store::CouchStore,
    sync_service::{
        types::{RunSummary, ScrapeConfig},
        Error, SyncService,
    },
};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Store and rate settings after CLI flags are layered over the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub url: String,
    pub database: String,
    pub node_rps: u32,
}

pub fn validate_args(args: &Cli) -> Result<(), String> {
    if args.batch_size == 0 {
        return Err("--batch-size must be > 0".to_string());
    }
    if args.node_rps == Some(0) {
        return Err("--node-rps must be > 0".to_string());
    }
    if let Some(host) = &args.rpc_host {
        if host.trim().is_empty() {
            return Err("--rpc-host must not be empty".to_string());
        }
    }
    if let Some(db) = &args.store_db {
        if db.trim().is_empty() {
            return Err("--store-db must not be empty".to_string());
        }
    }
    resolve_metrics_addr(args)?;
    Ok(())
}

pub fn resolve_metrics_addr(args: &Cli) -> Result<Option<SocketAddr>, String> {
    args.metrics_bind
        .as_deref()
        .map(|raw| {
            raw.parse::<SocketAddr>()
                .map_err(|err| format!("invalid --metrics-bind address `{raw}`: {err}"))
        })
        .transpose()
}

/// Builds a node config from `--rpc-*` flags. Returns `None` when no flag was given so the
/// file-based layers get a say.
pub fn explicit_node_config(args: &Cli) -> Option<NodeRpcConfig> {
    if args.rpc_host.is_none()
        && args.rpc_port.is_none()
        && args.rpc_user.is_none()
        && args.rpc_password.is_none()
    {
        return None;
    }

    let defaults = NodeRpcConfig::default();
    Some(NodeRpcConfig {
        host: args.rpc_host.clone().unwrap_or(defaults.host),
        port: args.rpc_port.unwrap_or(defaults.port),
        user: args.rpc_user.clone().unwrap_or(defaults.user),
        pass: args.rpc_password.clone().unwrap_or(defaults.pass),
    })
}

pub fn resolve_store_settings(args: &Cli, env_config: Config) -> StoreSettings {
    StoreSettings {
        url: args.store_url.clone().unwrap_or(env_config.store_url),
        database: args.store_db.clone().unwrap_or(env_config.store_db),
        node_rps: args.node_rps.unwrap_or(env_config.node_rps),
    }
}

fn stale_after(debug: bool) -> Duration {
    if debug {
        DEBUG_STALE_AFTER
    } else {
        STALE_AFTER
    }
}

/// How often the lock holder line is rewritten during a run.
fn heartbeat_period(stale_after: Duration) -> Duration {
    (stale_after / 4).max(Duration::from_secs(1))
}

/// Runs one scrape and returns the process exit code.
///
/// 0: run finished cleanly, or another run holds the lock. 1: fatal error or a run with
/// failed pages or unresolved conflicts. 2: invalid arguments or configuration.
pub async fn run_scrape_once(args: Cli, cancel: CancellationToken) -> i32 {
    dotenv().ok();

    let logging_context = init_logging("namesync", args.debug);
    let run_span = logging_context.run_span();
    let _run_guard = run_span.enter();
    info!(event = "scrape_starting", debug = args.debug, "starting scrape run");

    if let Err(err) = validate_args(&args) {
        eprintln!("{err}");
        return 2;
    }
    let metrics_addr = match resolve_metrics_addr(&args) {
        Ok(addr) => addr,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    let env_config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };
    let store_settings = resolve_store_settings(&args, env_config);

    let node_conf_path = args.node_conf.clone().or_else(default_node_conf_path);
    let resolved = match resolve_node_config(
        explicit_node_config(&args),
        &args.settings,
        node_conf_path.as_deref(),
    ) {
        Ok(resolved) => resolved,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };
    info!(
        event = "node_config_resolved",
        source = %resolved.source,
        endpoint = %resolved.config.endpoint(),
        "resolved node rpc settings"
    );

    let stale_after = stale_after(args.debug);
    let lock = match RunLock::acquire(&args.lock_file, stale_after) {
        Ok(lock) => lock,
        Err(err) => {
            match &err {
                LockError::Held { path, holder } => warn!(
                    event = "scrape_lock_held",
                    path = %path.display(),
                    holder = %holder,
                    "another scrape is running; exiting"
                ),
                LockError::Stale { path, holder, age } => error!(
                    event = "scrape_lock_stale",
                    path = %path.display(),
                    holder = %holder,
                    age_secs = age.as_secs(),
                    "lock holder stopped refreshing the lock; it may be hung"
                ),
                LockError::Io { .. } => {
                    let error_report = format_error_report(&err);
                    error!(
                        event = "scrape_lock_failed",
                        error = %err,
                        error_report = %error_report,
                        "could not open lock file"
                    );
                    eprintln!("{error_report}");
                }
            }
            return lock_exit_code(&err);
        }
    };

    let node = match JsonRpcNode::new(&resolved.config, build_rate_limiter(store_settings.node_rps)) {
        Ok(node) => node,
        Err(err) => {
            let error_report = format_error_report(&err);
            error!(
                event = "node_client_build_failed",
                error = %err,
                error_report = %error_report,
                "failed to build node client"
            );
            eprintln!("{error_report}");
            return 1;
        }
    };
    let store = match CouchStore::new(&store_settings.url, &store_settings.database) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("invalid store settings: {err}");
            return 2;
        }
    };
    info!(
        event = "store_configured",
        url = %store.base_url(),
        database = %store.database(),
        node_rps = store_settings.node_rps,
        "store configured"
    );

    match node.info().await {
        Ok(node_info) => debug!(event = "node_info", info = %node_info, "node reachable"),
        Err(err) => debug!(event = "node_info_failed", error = %err, "getinfo failed"),
    }

    let metrics_server_handle = match metrics_addr {
        Some(addr) => {
            let app_state = Arc::new(AppState::new(cancel.clone()));
            match setup_server_with_addr(app_state, addr).await {
                Ok(handle) => Some(handle),
                Err(err) => {
                    let error_report = format_error_report(&err);
                    error!(
                        event = "metrics_server_start_failed",
                        bind = %addr,
                        error = %err,
                        error_report = %error_report,
                        "failed to start metrics endpoint"
                    );
                    eprintln!("failed to start metrics endpoint on {addr}: {err}");
                    return 1;
                }
            }
        }
        None => None,
    };

    let service = SyncService::new(
        node,
        store,
        ScrapeConfig {
            batch_size: args.batch_size,
            ..ScrapeConfig::default()
        },
    );

    let run = service.run(&cancel);
    tokio::pin!(run);
    let mut heartbeat = tokio::time::interval(heartbeat_period(stale_after));
    heartbeat.tick().await;
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = heartbeat.tick() => {
                if let Err(err) = lock.refresh() {
                    warn!(event = "scrape_lock_refresh_failed", error = %err, "could not refresh lock");
                }
            }
        }
    };
    drop(lock);

    if let Some(handle) = metrics_server_handle {
        handle.abort();
    }

    match &result {
        Ok(summary) if summary.is_clean() => {
            info!(
                event = "scrape_complete",
                cancelled = summary.cancelled,
                "scrape run completed"
            );
        }
        Ok(summary) => {
            warn!(
                event = "scrape_incomplete",
                pages_failed = summary.pages_failed,
                reconcile_failed = summary.reconcile.failed,
                "scrape run finished with failures"
            );
        }
        Err(err) => {
            let error_report = format_error_report(err);
            error!(
                event = "scrape_failed",
                error = %err,
                error_debug = ?err,
                error_report = %error_report,
                "scrape run failed"
            );
            eprintln!("scrape failed: {err}");
            eprintln!("{error_report}");
        }
    }
    run_exit_code(&result)
}

/// Held and stale locks exit 0; an unusable lock file exits 1.
fn lock_exit_code(err: &LockError) -> i32 {
    match err {
        LockError::Held { .. } | LockError::Stale { .. } => 0,
        LockError::Io { .. } => 1,
    }
}

fn run_exit_code(result: &Result<RunSummary, Error>) -> i32 {
    match result {
        Ok(summary) if summary.is_clean() => 0,
        Ok(_) | Err(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_client::NodeError;
    use crate::sync_service::types::ReconcileSummary;
    use clap::Parser;
    use std::io;
    use std::path::PathBuf;

    fn env_config() -> Config {
        Config {
            store_url: "http://couch:5984".to_string(),
            store_db: "bit".to_string(),
            node_rps: 50,
        }
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let args = Cli::parse_from(["namesync", "--batch-size", "0"]);
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn zero_node_rps_is_rejected() {
        let args = Cli::parse_from(["namesync", "--node-rps", "0"]);
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn bad_metrics_bind_is_rejected() {
        let args = Cli::parse_from(["namesync", "--metrics-bind", "localhost"]);
        let err = validate_args(&args).unwrap_err();
        assert!(err.contains("--metrics-bind"));
    }

    #[test]
    fn metrics_bind_is_optional() {
        let args = Cli::parse_from(["namesync"]);
        assert_eq!(resolve_metrics_addr(&args), Ok(None));

        let args = Cli::parse_from(["namesync", "--metrics-bind", "127.0.0.1:9100"]);
        assert_eq!(
            resolve_metrics_addr(&args),
            Ok(Some("127.0.0.1:9100".parse().unwrap()))
        );
    }

    #[test]
    fn no_rpc_flags_defers_to_config_files() {
        let args = Cli::parse_from(["namesync"]);
        assert_eq!(explicit_node_config(&args), None);
    }

    #[test]
    fn partial_rpc_flags_fill_in_defaults() {
        let args = Cli::parse_from(["namesync", "--rpc-user", "u", "--rpc-password", "p"]);
        assert_eq!(
            explicit_node_config(&args),
            Some(NodeRpcConfig {
                host: "localhost".to_string(),
                port: 8334,
                user: "u".to_string(),
                pass: "p".to_string(),
            })
        );
    }

    #[test]
    fn store_flags_override_environment() {
        let args = Cli::parse_from(["namesync", "--store-db", "names", "--node-rps", "5"]);
        assert_eq!(
            resolve_store_settings(&args, env_config()),
            StoreSettings {
                url: "http://couch:5984".to_string(),
                database: "names".to_string(),
                node_rps: 5,
            }
        );
    }

    #[test]
    fn debug_shortens_lock_staleness() {
        assert_eq!(stale_after(true), Duration::from_secs(60));
        assert_eq!(stale_after(false), Duration::from_secs(3600));
        assert_eq!(heartbeat_period(stale_after(true)), Duration::from_secs(15));
        assert_eq!(heartbeat_period(Duration::ZERO), Duration::from_secs(1));
    }

    #[test]
    fn lock_contention_exits_cleanly() {
        let path = PathBuf::from("namesync.lock");
        let held = LockError::Held {
            path: path.clone(),
            holder: "pid=1 refreshed_at=0".to_string(),
        };
        let stale = LockError::Stale {
            path: path.clone(),
            holder: "pid=1 refreshed_at=0".to_string(),
            age: Duration::from_secs(7200),
        };
        let io = LockError::Io {
            path,
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };

        assert_eq!(lock_exit_code(&held), 0);
        assert_eq!(lock_exit_code(&stale), 0);
        assert_eq!(lock_exit_code(&io), 1);
    }

    #[test]
    fn run_outcome_maps_to_exit_code() {
        assert_eq!(run_exit_code(&Ok(RunSummary::default())), 0);

        let cancelled = RunSummary {
            cancelled: true,
            ..RunSummary::default()
        };
        assert_eq!(run_exit_code(&Ok(cancelled)), 0);

        let failed_page = RunSummary {
            pages_failed: 1,
            ..RunSummary::default()
        };
        assert_eq!(run_exit_code(&Ok(failed_page)), 1);

        let unresolved = RunSummary {
            reconcile: ReconcileSummary {
                failed: 2,
                ..ReconcileSummary::default()
            },
            ..RunSummary::default()
        };
        assert_eq!(run_exit_code(&Ok(unresolved)), 1);

        let setup = Error::during_setup(
            "reading block count",
            NodeError::ConnectError("connection refused".to_string()),
        );
        assert_eq!(run_exit_code(&Err(setup)), 1);
    }
}
