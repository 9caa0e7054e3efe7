use serde_json::{Map, Value};
use tracing::warn;

use super::types::{
    Checkpoint, CheckpointUpdate, ScanWindow, CHECKPOINT_ID, FULL_WINDOW_AGE, REORG_OVERLAP,
};
use crate::store::{DocumentStore, StoreError, WriteAck};

const BLOCKS_FIELD: &str = "blocks";

/// Decides this run's scan window and the checkpoint write that goes with it.
///
/// Rules:
/// - No checkpoint yet: scan every unexpired name and create the checkpoint.
/// - Checkpoint below `FULL_WINDOW_AGE`: the mirror is not warm yet, scan everything.
/// - Otherwise resume `REORG_OVERLAP` blocks behind the checkpoint.
///
/// Every case schedules the checkpoint to move to `block_height`. A checkpoint ahead of the
/// node clamps the age to one block.
pub fn compute_window(
    block_height: i64,
    stored: Option<&Checkpoint>,
    page_size: u64,
) -> (ScanWindow, CheckpointUpdate) {
    match stored {
        None => (
            ScanWindow::new(FULL_WINDOW_AGE, page_size),
            CheckpointUpdate::Create {
                blocks: block_height,
            },
        ),
        Some(checkpoint) => {
            let age = if checkpoint.blocks < FULL_WINDOW_AGE as i64 {
                FULL_WINDOW_AGE
            } else {
                let resume_from = checkpoint.blocks - REORG_OVERLAP;
                block_height.saturating_sub(resume_from).max(1) as u64
            };
            (
                ScanWindow::new(age, page_size),
                CheckpointUpdate::Update {
                    rev: checkpoint.rev.clone(),
                    blocks: block_height,
                },
            )
        }
    }
}

/// Reads the stored checkpoint. A missing document is `Ok(None)`.
pub async fn load_checkpoint<S: DocumentStore>(store: &S) -> Result<Option<Checkpoint>, StoreError> {
    match store.get(CHECKPOINT_ID).await {
        Ok(doc) => {
            let blocks = doc.body.get(BLOCKS_FIELD).and_then(Value::as_i64);
            if blocks.is_none() {
                warn!(
                    event = "checkpoint_blocks_invalid",
                    rev = %doc.rev,
                    "checkpoint document has no integer `blocks`; treating mirror as cold"
                );
            }
            Ok(Some(Checkpoint {
                blocks: blocks.unwrap_or(0),
                rev: doc.rev,
            }))
        }
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Applies a scheduled checkpoint write.
pub async fn write_checkpoint<S: DocumentStore>(
    store: &S,
    update: &CheckpointUpdate,
) -> Result<WriteAck, StoreError> {
    let mut body = Map::new();
    body.insert(BLOCKS_FIELD.to_string(), Value::from(update.blocks()));

    match update {
        CheckpointUpdate::Create { .. } => store.create(CHECKPOINT_ID, &body).await,
        CheckpointUpdate::Update { rev, .. } => store.update(CHECKPOINT_ID, rev, &body).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(blocks: i64) -> Checkpoint {
        Checkpoint {
            blocks,
            rev: "7-abc".to_string(),
        }
    }

    #[test]
    fn missing_checkpoint_scans_full_window_and_creates() {
        let (window, update) = compute_window(100_000, None, 100);
        assert_eq!(window, ScanWindow { age: 36_000, start: 0, max: 100 });
        assert_eq!(update, CheckpointUpdate::Create { blocks: 100_000 });
    }

    #[test]
    fn warm_checkpoint_resumes_with_overlap() {
        let stored = checkpoint(40_000);
        let (window, update) = compute_window(40_010, Some(&stored), 100);
        assert_eq!(window.age, 16);
        assert_eq!(
            update,
            CheckpointUpdate::Update {
                rev: "7-abc".to_string(),
                blocks: 40_010
            }
        );
    }

    #[test]
    fn cold_checkpoint_uses_full_window_but_still_updates() {
        let stored = checkpoint(35_999);
        let (window, update) = compute_window(50_000, Some(&stored), 100);
        assert_eq!(window.age, FULL_WINDOW_AGE);
        assert!(matches!(update, CheckpointUpdate::Update { blocks: 50_000, .. }));
    }

    #[test]
    fn unchanged_height_rescans_overlap_only() {
        let stored = checkpoint(40_000);
        let (window, _) = compute_window(40_000, Some(&stored), 100);
        assert_eq!(window.age, REORG_OVERLAP as u64);
    }

    #[test]
    fn checkpoint_ahead_of_node_clamps_age() {
        let stored = checkpoint(40_100);
        let (window, _) = compute_window(40_000, Some(&stored), 100);
        assert_eq!(window.age, 1);
    }
}
