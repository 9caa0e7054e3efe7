use std::time::Duration;

use crate::node_client::{FilterQuery, DEFAULT_NAMESPACE};

/// Names the scrape mirrors: lowercase, hyphenated labels in the `d/` namespace.
pub const NAME_PATTERN: &str = "^d/[a-z][a-z0-9-]{0,61}[a-z0-9]$";
/// Block age that covers every unexpired name (names expire after 36000 blocks).
pub const FULL_WINDOW_AGE: u64 = 36_000;
/// Blocks re-scanned behind the checkpoint (about one hour at the chain's block interval).
pub const REORG_OVERLAP: i64 = 6;
pub const DEFAULT_BATCH_SIZE: u64 = 100;
/// Store id of the singleton checkpoint document.
pub const CHECKPOINT_ID: &str = "$lastBlockCount";

/// Block-age range and pagination cursor for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub age: u64,
    pub start: u64,
    pub max: u64,
}

impl ScanWindow {
    /// A page size of 0 is raised to 1 so the cursor always moves.
    pub fn new(age: u64, max: u64) -> Self {
        Self {
            age,
            start: 0,
            max: max.max(1),
        }
    }

    /// Count-only query over the whole window.
    pub fn stat_query(&self, regex: &str) -> FilterQuery {
        FilterQuery {
            regex: regex.to_string(),
            age: self.age,
            start: 0,
            max: 0,
            stat: true,
        }
    }

    /// Query for the page at the current cursor.
    pub fn page_query(&self, regex: &str) -> FilterQuery {
        FilterQuery {
            regex: regex.to_string(),
            age: self.age,
            start: self.start,
            max: self.max,
            stat: false,
        }
    }

    /// Moves the cursor one nominal page forward.
    pub fn advance(&mut self) {
        self.start = self.start.saturating_add(self.max);
    }
}

/// Stored last-synced height plus the revision needed to overwrite it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub blocks: i64,
    pub rev: String,
}

/// Checkpoint write scheduled for the start of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointUpdate {
    Create { blocks: i64 },
    Update { rev: String, blocks: i64 },
}

impl CheckpointUpdate {
    pub fn blocks(&self) -> i64 {
        match self {
            CheckpointUpdate::Create { blocks } | CheckpointUpdate::Update { blocks, .. } => *blocks,
        }
    }
}

/// Configures bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first attempt.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            jitter: Duration::from_millis(25),
        }
    }
}

/// Tunables for one scrape run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeConfig {
    pub namespace: String,
    pub name_pattern: String,
    pub batch_size: u64,
    /// Applies to conditional writes that keep hitting revision conflicts.
    pub conflict_retry: RetryPolicy,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            name_pattern: NAME_PATTERN.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            conflict_retry: RetryPolicy::default(),
        }
    }
}

/// What happened to one conflicting record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Store already matched the node.
    UpToDate,
    /// Stored document was overwritten with the node's value.
    Updated { rev: String, attempts: u32 },
    /// Store had no document, so one was created.
    Created { rev: String },
    /// The node's current value did not survive sanitization.
    Rejected,
    /// Node/store failure, or conflicts persisted past the retry budget.
    Failed { attempts: u32, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub conflicts: usize,
    pub up_to_date: usize,
    pub updated: usize,
    pub created: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Non-conflict per-document errors seen in the batch response.
    pub other_errors: usize,
}

impl ReconcileSummary {
    pub fn record(&mut self, outcome: &ReconcileOutcome) {
        self.conflicts += 1;
        match outcome {
            ReconcileOutcome::UpToDate => self.up_to_date += 1,
            ReconcileOutcome::Updated { .. } => self.updated += 1,
            ReconcileOutcome::Created { .. } => self.created += 1,
            ReconcileOutcome::Rejected => self.rejected += 1,
            ReconcileOutcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &ReconcileSummary) {
        self.conflicts += other.conflicts;
        self.up_to_date += other.up_to_date;
        self.updated += other.updated;
        self.created += other.created;
        self.rejected += other.rejected;
        self.failed += other.failed;
        self.other_errors += other.other_errors;
    }
}

/// Result of processing one page of names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSummary {
    pub start: u64,
    pub fetched: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub written: usize,
    pub reconcile: ReconcileSummary,
}

/// Outcome summary of one scrape run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub block_height: i64,
    pub window_age: u64,
    pub total_count: u64,
    pub pages_completed: usize,
    pub pages_failed: usize,
    pub records_fetched: usize,
    pub records_rejected: usize,
    pub records_written: usize,
    pub checkpoint_written: bool,
    pub cancelled: bool,
    pub reconcile: ReconcileSummary,
}

impl RunSummary {
    pub fn absorb_page(&mut self, page: &PageSummary) {
        self.pages_completed += 1;
        self.records_fetched += page.fetched;
        self.records_rejected += page.rejected;
        self.records_written += page.written;
        self.reconcile.merge(&page.reconcile);
    }

    /// True when every page and every conflict was handled.
    pub fn is_clean(&self) -> bool {
        self.pages_failed == 0 && self.reconcile.failed == 0
    }
}
