use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::context::RunContext;
use super::retry::run_with_retry;
use super::sanitizer::scrub;
use super::types::{ReconcileOutcome, ReconcileSummary};
use crate::node_client::NameNode;
use crate::store::{record_body, BatchOutcome, DocumentStore, StoreError};

enum WriteStep {
    UpToDate,
    Updated(String),
    Created(String),
}

/// Resolves batch-write conflicts against the node's current value.
///
/// Conflicts are handled one at a time so a conflict-heavy page never fans out into a burst of
/// node and store requests.
pub struct ConflictReconciler<'r, 'a, N, S>
where
    N: NameNode,
    S: DocumentStore,
{
    ctx: &'r RunContext<'a, N, S>,
}

impl<'r, 'a, N, S> ConflictReconciler<'r, 'a, N, S>
where
    N: NameNode,
    S: DocumentStore,
{
    pub fn new(ctx: &'r RunContext<'a, N, S>) -> Self {
        Self { ctx }
    }

    /// Walks batch outcomes in order and reconciles every conflict.
    pub async fn resolve(&self, outcomes: &[BatchOutcome]) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        for outcome in outcomes {
            if outcome.is_conflict() {
                let result = self.reconcile(&outcome.id).await;
                summary.record(&result);
            } else if let Some(error) = &outcome.error {
                summary.other_errors += 1;
                warn!(
                    event = "batch_document_rejected",
                    name = %outcome.id,
                    error = %error,
                    reason = ?outcome.reason,
                    "store rejected document in batch write"
                );
            }
        }

        summary
    }

    /// Brings one stored record in line with the node.
    ///
    /// The node value and the stored value are both scrubbed before comparison, so revision
    /// tokens and other internal keys never cause a rewrite.
    pub async fn reconcile(&self, name: &str) -> ReconcileOutcome {
        let entry = match self.ctx.node.show(name, self.ctx.sanitizer.namespace()).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    event = "reconcile_node_lookup_failed",
                    name = %name,
                    error = %err,
                    "could not fetch current value from node"
                );
                return ReconcileOutcome::Failed {
                    attempts: 0,
                    message: err.to_string(),
                };
            }
        };

        let record = match self.ctx.sanitizer.clean_entry(&entry, self.ctx.block_height) {
            Ok(record) => record.scrubbed(),
            Err(rejection) => {
                debug!(
                    event = "reconcile_value_rejected",
                    name = %name,
                    rejection = ?rejection,
                    "node value no longer passes sanitization"
                );
                return ReconcileOutcome::Rejected;
            }
        };

        let result = run_with_retry(
            &self.ctx.config.conflict_retry,
            name,
            |_| self.write_if_changed(name, &record.value),
            StoreError::is_conflict,
        )
        .await;

        match result {
            Ok((WriteStep::UpToDate, _)) => {
                debug!(event = "record_up_to_date", name = %name, "already up to date");
                ReconcileOutcome::UpToDate
            }
            Ok((WriteStep::Updated(rev), attempts)) => {
                info!(event = "record_updated", name = %name, rev = %rev, attempts, "updated");
                ReconcileOutcome::Updated { rev, attempts }
            }
            Ok((WriteStep::Created(rev), _)) => {
                info!(event = "record_created", name = %name, rev = %rev, "created");
                ReconcileOutcome::Created { rev }
            }
            Err(terminal) => {
                warn!(
                    event = "record_update_failed",
                    name = %name,
                    attempts = terminal.attempts,
                    conflict = terminal.exhausted_retryable,
                    error = %terminal.error,
                    "failed to update"
                );
                ReconcileOutcome::Failed {
                    attempts: terminal.attempts,
                    message: terminal.error.to_string(),
                }
            }
        }
    }

    /// One read-compare-write pass against the store's current revision.
    async fn write_if_changed(
        &self,
        name: &str,
        node_value: &Map<String, Value>,
    ) -> Result<WriteStep, StoreError> {
        let body = record_body(node_value.clone());

        let doc = match self.ctx.store.get(name).await {
            Ok(doc) => doc,
            Err(err) if err.is_not_found() => {
                let ack = self.ctx.store.create(name, &body).await?;
                return Ok(WriteStep::Created(ack.rev));
            }
            Err(err) => return Err(err),
        };

        let mut stored = doc.record_value().cloned().unwrap_or_default();
        scrub(&mut stored);
        if &stored == node_value {
            return Ok(WriteStep::UpToDate);
        }

        let ack = self.ctx.store.update(name, &doc.rev, &body).await?;
        Ok(WriteStep::Updated(ack.rev))
    }
}
