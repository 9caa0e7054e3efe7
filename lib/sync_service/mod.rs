mod batch_writer;
pub mod checkpoint;
mod context;
mod error;
mod reconciler;
mod retry;
pub mod sanitizer;
mod scanner;
pub mod types;

#[cfg(test)]
mod test_support;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use batch_writer::{build_batch, write_batch};
pub use checkpoint::{compute_window, load_checkpoint, write_checkpoint};
pub use context::RunContext;
pub use error::Error;
pub use reconciler::ConflictReconciler;
pub use scanner::IncrementalScanner;
use types::{RunSummary, ScrapeConfig};

use crate::node_client::NameNode;
use crate::server::monitoring::SCRAPE_METRICS;
use crate::store::DocumentStore;

/// Mirrors name records from a node into a document store, one incremental run at a time.
pub struct SyncService<N, S>
where
    N: NameNode,
    S: DocumentStore,
{
    node: N,
    store: S,
    config: ScrapeConfig,
}

impl<N, S> SyncService<N, S>
where
    N: NameNode,
    S: DocumentStore,
{
    pub fn new(node: N, store: S, config: ScrapeConfig) -> Self {
        Self {
            node,
            store,
            config,
        }
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs one incremental scrape.
    ///
    /// Steps:
    /// 1. Read the node height and the stored checkpoint, derive the scan window.
    /// 2. Move the checkpoint to the current height. A failed write is logged; the window
    ///    computed in step 1 still drives the scan.
    /// 3. Count the names in the window, then page through them, writing each page as one batch
    ///    and reconciling any conflicts it reports.
    ///
    /// Failures in steps 1 and 3's count query abort the run. Later per-page failures are
    /// reported through the returned summary.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, Error> {
        let block_height = self
            .node
            .block_count()
            .await
            .map_err(|err| Error::during_setup("reading block count", err))?;
        let stored = load_checkpoint(&self.store)
            .await
            .map_err(|err| Error::during_setup("reading checkpoint", err))?;

        let (window, checkpoint_update) =
            compute_window(block_height, stored.as_ref(), self.config.batch_size);
        info!(
            event = "scan_window_computed",
            block_height,
            stored_blocks = ?stored.as_ref().map(|checkpoint| checkpoint.blocks),
            window_age = window.age,
            page_size = window.max,
            "computed scan window"
        );
        if let Some(metrics) = SCRAPE_METRICS.get() {
            metrics.block_height.set(block_height);
            metrics.window_age.set(window.age as i64);
        }

        let checkpoint_written = match write_checkpoint(&self.store, &checkpoint_update).await {
            Ok(ack) => {
                info!(
                    event = "checkpoint_written",
                    blocks = checkpoint_update.blocks(),
                    rev = %ack.rev,
                    "checkpoint advanced"
                );
                true
            }
            Err(err) => {
                warn!(
                    event = "checkpoint_write_failed",
                    blocks = checkpoint_update.blocks(),
                    error = %err,
                    "checkpoint not advanced; continuing with computed window"
                );
                false
            }
        };

        let ctx = RunContext::new(&self.node, &self.store, &self.config, block_height);
        let mut summary = IncrementalScanner::new(&ctx).run(window, cancel).await?;
        summary.checkpoint_written = checkpoint_written;

        info!(
            event = "scrape_summary",
            block_height = summary.block_height,
            window_age = summary.window_age,
            total_count = summary.total_count,
            pages_completed = summary.pages_completed,
            pages_failed = summary.pages_failed,
            records_fetched = summary.records_fetched,
            records_rejected = summary.records_rejected,
            records_written = summary.records_written,
            conflicts = summary.reconcile.conflicts,
            up_to_date = summary.reconcile.up_to_date,
            updated = summary.reconcile.updated,
            created = summary.reconcile.created,
            reconcile_failed = summary.reconcile.failed,
            checkpoint_written = summary.checkpoint_written,
            cancelled = summary.cancelled,
            "scrape run summary"
        );

        Ok(summary)
    }
}
