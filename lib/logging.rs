use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::Span;
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::server::monitoring::VERSION;

/// Output format for runtime logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    /// Reads `LOG_FORMAT`: `json`, or `text` (default).
    fn from_env() -> Self {
        std::env::var("LOG_FORMAT")
            .map(|raw| Self::parse(&raw))
            .unwrap_or(Self::Text)
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

/// Identity of one scrape invocation, stamped on the `scrape_run` span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingContext {
    pub service: String,
    pub environment: String,
    pub run_id: String,
    pub build_version: String,
    pub format: LogFormat,
}

impl LoggingContext {
    /// Span that wraps the whole run; node, store and reconcile events nest under it.
    pub fn run_span(&self) -> Span {
        tracing::info_span!(
            "scrape_run",
            service = %self.service,
            environment = %self.environment,
            run_id = %self.run_id,
            build_version = %self.build_version
        )
    }
}

/// Sets up logging for a cron-driven scrape.
///
/// reqwest reports connection reuse and redirects through the `log` crate, so
/// [`LogTracer`] forwards those records into the same subscriber as the scrape's own
/// events. Without `--debug` they are held at `warn` to keep one line per page.
/// `RUST_LOG` replaces the directives from [`filter_directives`] entirely.
pub fn init_logging(service: &str, debug: bool) -> LoggingContext {
    let context = LoggingContext {
        service: service.to_string(),
        environment: std::env::var("APP_ENV")
            .or_else(|_| std::env::var("ENVIRONMENT"))
            .unwrap_or_else(|_| "dev".to_string()),
        run_id: build_run_id(service),
        build_version: VERSION.to_string(),
        format: LogFormat::from_env(),
    };

    let _ = LogTracer::init();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(debug)));
    let installed = match context.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(debug))
            .try_init(),
    };

    let debug_enabled = debug;
    tracing::info!(
        event = "logging_initialized",
        run_id = %context.run_id,
        log_format = context.format.as_str(),
        debug = debug_enabled,
        subscriber_installed = installed.is_ok(),
        "initialized logging"
    );

    context
}

/// Default `EnvFilter` directives. Debug runs open up this crate and the RPC transport.
fn filter_directives(debug: bool) -> &'static str {
    if debug {
        "info,namesync=debug,namesync_lib=debug,reqwest=debug"
    } else {
        "info,reqwest=warn,hyper=warn"
    }
}

/// `<service>-<pid>-<epoch millis>`; distinguishes overlapping cron invocations in shared logs.
fn build_run_id(service: &str) -> String {
    let epoch_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or_default();
    format!("{service}-{}-{epoch_millis}", process::id())
}

/// Renders an error with its full source chain and a backtrace captured at the call site.
///
/// Used at process boundaries, where `%err` alone would hide the socket or parse failure
/// buried under a node or store error.
pub fn format_error_report(err: &(dyn StdError + 'static)) -> String {
    let mut report = format!("error: {err}");

    let mut current_source = err.source();
    let mut depth = 1usize;
    while let Some(source) = current_source {
        report.push_str(&format!("\ncaused by ({depth}): {source}"));
        current_source = source.source();
        depth = depth.saturating_add(1);
    }

    report.push_str("\nbacktrace:\n");
    report.push_str(&Backtrace::force_capture().to_string());
    report
}

#[cfg(test)]
mod tests {
    use super::{build_run_id, filter_directives, format_error_report, LogFormat, LoggingContext};
    use crate::node_client::NodeError;
    use crate::sync_service::Error;

    #[test]
    fn log_format_parsing_defaults_to_text() {
        assert_eq!(LogFormat::parse("JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Text);
    }

    #[test]
    fn debug_flag_opens_crate_and_transport_logs() {
        let debug = filter_directives(true);
        assert!(debug.contains("namesync_lib=debug"));
        assert!(debug.contains("reqwest=debug"));

        let quiet = filter_directives(false);
        assert!(quiet.starts_with("info,"));
        assert!(quiet.contains("reqwest=warn"));
    }

    #[test]
    fn run_id_names_service_and_process() {
        let run_id = build_run_id("namesync");
        assert!(run_id.starts_with(&format!("namesync-{}-", std::process::id())));
    }

    #[test]
    fn run_span_is_named_for_the_scrape() {
        let context = LoggingContext {
            service: "namesync".to_string(),
            environment: "test".to_string(),
            run_id: build_run_id("namesync"),
            build_version: "0.0.0".to_string(),
            format: LogFormat::Text,
        };
        // Spans stay disabled without a subscriber; metadata is still attached.
        let span = context.run_span();
        assert_eq!(span.metadata().map(|meta| meta.name()), Some("scrape_run"));
    }

    #[test]
    fn error_report_walks_source_chain() {
        let err = Error::during_setup(
            "reading block count",
            NodeError::ConnectError("connection refused".to_string()),
        );
        let report = format_error_report(&err);

        assert!(report.starts_with("error: scrape setup failed while reading block count"));
        assert!(report.contains("caused by (1): node error: connection error: connection refused"));
        assert!(report.contains("backtrace:"));
    }
}
