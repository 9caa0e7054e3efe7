use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::batch_writer::{build_batch, write_batch};
use super::context::RunContext;
use super::error::Error;
use super::reconciler::ConflictReconciler;
use super::types::{PageSummary, RunSummary, ScanWindow};
use crate::node_client::{FilterResult, NameNode, NodeError};
use crate::server::monitoring::SCRAPE_METRICS;
use crate::store::DocumentStore;

/// Pages through every name changed inside the window and mirrors it into the store.
pub struct IncrementalScanner<'r, 'a, N, S>
where
    N: NameNode,
    S: DocumentStore,
{
    ctx: &'r RunContext<'a, N, S>,
}

impl<'r, 'a, N, S> IncrementalScanner<'r, 'a, N, S>
where
    N: NameNode,
    S: DocumentStore,
{
    pub fn new(ctx: &'r RunContext<'a, N, S>) -> Self {
        Self { ctx }
    }

    /// Asks the node how many names the window covers. This is the run's completion target.
    pub async fn count_targets(&self, window: &ScanWindow) -> Result<u64, Error> {
        let query = window.stat_query(&self.ctx.config.name_pattern);
        match self.ctx.node.filter(&query).await? {
            FilterResult::Stat(stat) => Ok(stat.count),
            FilterResult::Names(names) => Err(NodeError::UnexpectedShape {
                method: "name_filter".to_string(),
                detail: format!("expected stat object, got {} names", names.len()),
            }
            .into()),
        }
    }

    /// Drives the scan to completion.
    ///
    /// The count query failing is fatal. After that, a failed page is logged and skipped and
    /// the loop moves on to the next offset. Cancellation is honoured between pages.
    pub async fn run(
        &self,
        mut window: ScanWindow,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, Error> {
        let total = self
            .count_targets(&window)
            .await
            .map_err(|err| Error::during_setup("counting names in window", err))?;

        let mut summary = RunSummary {
            block_height: self.ctx.block_height,
            window_age: window.age,
            total_count: total,
            ..RunSummary::default()
        };
        if let Some(metrics) = SCRAPE_METRICS.get() {
            metrics.target_total.set(total as i64);
        }
        info!(
            event = "scan_started",
            total,
            window_age = window.age,
            page_size = window.max,
            "scanning names in window"
        );

        let mut page_clock = Instant::now();
        while window.start < total {
            if cancel.is_cancelled() {
                info!(
                    event = "scan_cancelled",
                    scraped = window.start,
                    total,
                    "cancellation requested; stopping before next page"
                );
                summary.cancelled = true;
                break;
            }

            match self.process_page(&window).await {
                Ok(Some(page)) => {
                    summary.absorb_page(&page);
                    record_page_metrics(&page);
                }
                Ok(None) => {
                    info!(
                        event = "scan_exhausted_early",
                        start = window.start,
                        total,
                        "node returned an empty page before the counted total"
                    );
                    break;
                }
                Err(err) => {
                    summary.pages_failed += 1;
                    if let Some(metrics) = SCRAPE_METRICS.get() {
                        metrics.pages_failed_total.inc();
                    }
                    error!(
                        event = "scan_page_failed",
                        start = window.start,
                        page_size = window.max,
                        error = %err,
                        "page aborted"
                    );
                }
            }

            // Offsets index the node's result list, so the cursor moves by the requested page
            // size no matter how many records were accepted.
            window.advance();

            let elapsed = page_clock.elapsed();
            page_clock = Instant::now();
            let scraped = window.start.min(total);
            if let Some(metrics) = SCRAPE_METRICS.get() {
                metrics.scraped_offset.set(scraped as i64);
                metrics.progress_percent.set(progress_percent(scraped, total));
            }
            info!(
                event = "scan_progress",
                scraped,
                total,
                page_secs = elapsed.as_secs_f64(),
                "page processed"
            );
        }

        Ok(summary)
    }

    async fn process_page(&self, window: &ScanWindow) -> Result<Option<PageSummary>, Error> {
        let query = window.page_query(&self.ctx.config.name_pattern);
        let entries = match self.ctx.node.filter(&query).await? {
            FilterResult::Names(entries) => entries,
            FilterResult::Stat(_) => {
                return Err(NodeError::UnexpectedShape {
                    method: "name_filter".to_string(),
                    detail: "expected a page of names, got a stat object".to_string(),
                }
                .into())
            }
        };
        if entries.is_empty() {
            return Ok(None);
        }

        let mut page = PageSummary {
            start: window.start,
            fetched: entries.len(),
            ..PageSummary::default()
        };

        let mut records = Vec::with_capacity(entries.len());
        for entry in &entries {
            if entry.value.is_empty() {
                page.rejected += 1;
                continue;
            }
            match self.ctx.sanitizer.clean_entry(entry, self.ctx.block_height) {
                Ok(record) => records.push(record.scrubbed()),
                Err(rejection) => {
                    page.rejected += 1;
                    debug!(
                        event = "record_rejected",
                        name = %entry.name,
                        rejection = ?rejection,
                        "dropping unusable value"
                    );
                }
            }
        }

        let (batch, duplicates) = build_batch(records);
        page.duplicates = duplicates;

        let outcomes = write_batch(self.ctx.store, &batch).await?;
        page.written = outcomes.iter().filter(|outcome| !outcome.is_error()).count();
        page.reconcile = ConflictReconciler::new(self.ctx).resolve(&outcomes).await;

        debug!(
            event = "page_written",
            start = page.start,
            fetched = page.fetched,
            rejected = page.rejected,
            duplicates = page.duplicates,
            written = page.written,
            conflicts = page.reconcile.conflicts,
            "page written"
        );
        Ok(Some(page))
    }
}

fn record_page_metrics(page: &PageSummary) {
    let Some(metrics) = SCRAPE_METRICS.get() else {
        return;
    };
    metrics.pages_total.inc();
    metrics.records_fetched_total.inc_by(page.fetched as u64);
    metrics.records_rejected_total.inc_by(page.rejected as u64);
    metrics.records_written_total.inc_by(page.written as u64);
    metrics.conflicts_total.inc_by(page.reconcile.conflicts as u64);
    metrics
        .reconciled_total
        .inc_by((page.reconcile.updated + page.reconcile.created) as u64);
    metrics.up_to_date_total.inc_by(page.reconcile.up_to_date as u64);
    metrics
        .reconcile_failures_total
        .inc_by(page.reconcile.failed as u64);
}

fn progress_percent(scraped: u64, total: u64) -> i64 {
    if total == 0 {
        return 100;
    }
    (scraped.saturating_mul(100) / total) as i64
}
