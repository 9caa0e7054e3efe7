use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Registers the running version as a labeled gauge fixed at `1`.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "namesync",
            version: VERSION,
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
}

#[derive(Clone)]
pub struct ScrapeMetrics {
    /// Node height observed at the start of the run.
    pub block_height: Gauge,
    /// Block age of the active scan window.
    pub window_age: Gauge,
    /// Names the node reports inside the window.
    pub target_total: Gauge,
    /// Offset reached in the node's result list.
    pub scraped_offset: Gauge,
    /// Integer percent complete (0-100) for the active window.
    pub progress_percent: Gauge,
    pub pages_total: Counter,
    pub pages_failed_total: Counter,
    pub records_fetched_total: Counter,
    /// Values dropped by sanitization.
    pub records_rejected_total: Counter,
    /// Documents accepted by batch writes without conflict.
    pub records_written_total: Counter,
    pub conflicts_total: Counter,
    /// Conflicts resolved by an update or a create.
    pub reconciled_total: Counter,
    pub up_to_date_total: Counter,
    pub reconcile_failures_total: Counter,
}

impl ScrapeMetrics {
    fn init() -> Self {
        Self {
            block_height: Gauge::default(),
            window_age: Gauge::default(),
            target_total: Gauge::default(),
            scraped_offset: Gauge::default(),
            progress_percent: Gauge::default(),
            pages_total: Counter::default(),
            pages_failed_total: Counter::default(),
            records_fetched_total: Counter::default(),
            records_rejected_total: Counter::default(),
            records_written_total: Counter::default(),
            conflicts_total: Counter::default(),
            reconciled_total: Counter::default(),
            up_to_date_total: Counter::default(),
            reconcile_failures_total: Counter::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "block_height",
            "Node block height observed at the start of the run",
            metrics.block_height.clone(),
        );
        sub_registry.register(
            "window_age",
            "Block age covered by the active scan window",
            metrics.window_age.clone(),
        );
        sub_registry.register(
            "target_total",
            "Number of names the node reports inside the scan window",
            metrics.target_total.clone(),
        );
        sub_registry.register(
            "scraped_offset",
            "Offset reached in the node's filtered name list",
            metrics.scraped_offset.clone(),
        );
        sub_registry.register(
            "progress_percent",
            "Integer percent complete (0-100) for the active scan window",
            metrics.progress_percent.clone(),
        );
        sub_registry.register(
            "pages",
            "Total number of pages processed",
            metrics.pages_total.clone(),
        );
        sub_registry.register(
            "pages_failed",
            "Total number of pages aborted by a node or store failure",
            metrics.pages_failed_total.clone(),
        );
        sub_registry.register(
            "records_fetched",
            "Total number of name records fetched from the node",
            metrics.records_fetched_total.clone(),
        );
        sub_registry.register(
            "records_rejected",
            "Total number of name values dropped by sanitization",
            metrics.records_rejected_total.clone(),
        );
        sub_registry.register(
            "records_written",
            "Total number of documents saved by batch writes",
            metrics.records_written_total.clone(),
        );
        sub_registry.register(
            "conflicts",
            "Total number of batch write conflicts",
            metrics.conflicts_total.clone(),
        );
        sub_registry.register(
            "reconciled",
            "Total number of conflicts resolved by an update or create",
            metrics.reconciled_total.clone(),
        );
        sub_registry.register(
            "up_to_date",
            "Total number of conflicts where the store already matched the node",
            metrics.up_to_date_total.clone(),
        );
        sub_registry.register(
            "reconcile_failures",
            "Total number of conflicts that could not be resolved",
            metrics.reconcile_failures_total.clone(),
        );
        metrics
    }
}

pub static SCRAPE_METRICS: OnceCell<ScrapeMetrics> = OnceCell::const_new();
