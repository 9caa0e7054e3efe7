use namesync_lib::{cli::parse_args, commands::run_scrape_once};

use log::info;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancels the run when SIGTERM or SIGINT arrives. The scan stops before its next page.
async fn handle_shutdown_signals(shutdown_token: CancellationToken) {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                log::warn!("Could not register signal handlers; shutdown signals will kill the run.");
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("SIGTERM received, stopping after the current page.");
        }
        _ = sigint.recv() => {
            info!("SIGINT received, stopping after the current page.");
        }
    }

    shutdown_token.cancel();
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    let shutdown_token = CancellationToken::new();
    let shutdown_handle = tokio::spawn(handle_shutdown_signals(shutdown_token.clone()));

    let code = run_scrape_once(args, shutdown_token).await;

    shutdown_handle.abort();
    std::process::exit(code);
}
