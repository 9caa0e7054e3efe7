use std::collections::HashSet;

use tracing::warn;

use super::sanitizer::Record;
use crate::store::{BatchOutcome, DocumentStore, NewDocument, StoreError};

/// Turns sanitized records into batch documents, keyed by bare name.
///
/// A page can list the same name twice (the node reports every update inside the window), and
/// the store would answer the second copy with a conflict against the first. The last
/// occurrence wins. Returns the documents and the number of dropped duplicates.
pub fn build_batch(records: Vec<Record>) -> (Vec<NewDocument>, usize) {
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    let mut unique_reversed: Vec<NewDocument> = Vec::with_capacity(records.len());
    let mut duplicates = 0usize;

    for record in records.into_iter().rev() {
        if seen.insert(record.name.clone()) {
            unique_reversed.push(NewDocument::record(record.name, record.value));
        } else {
            duplicates += 1;
        }
    }

    unique_reversed.reverse();
    (unique_reversed, duplicates)
}

/// Submits one page as a single multi-document write.
///
/// Transport failures abort the whole batch; per-document failures, conflicts included, come
/// back in the outcome list in submission order.
pub async fn write_batch<S: DocumentStore>(
    store: &S,
    batch: &[NewDocument],
) -> Result<Vec<BatchOutcome>, StoreError> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }

    let outcomes = store.save_batch(batch).await?;
    if outcomes.len() != batch.len() {
        warn!(
            event = "batch_outcome_count_mismatch",
            submitted = batch.len(),
            outcomes = outcomes.len(),
            "store returned a different number of outcomes than documents submitted"
        );
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::build_batch;
    use crate::sync_service::sanitizer::Record;
    use serde_json::{json, Map, Value};

    fn record(name: &str, ip: &str) -> Record {
        let mut value = Map::new();
        value.insert("ip".to_string(), Value::from(ip));
        Record {
            name: name.to_string(),
            raw_value: String::new(),
            value,
            expires_at_block: 0,
        }
    }

    #[test]
    fn duplicate_names_keep_last_value_in_original_order() {
        let (batch, duplicates) = build_batch(vec![
            record("alpha", "1.1.1.1"),
            record("beta", "2.2.2.2"),
            record("alpha", "3.3.3.3"),
        ]);

        assert_eq!(duplicates, 1);
        let ids: Vec<&str> = batch.iter().map(|doc| doc.id.as_str()).collect();
        assert_eq!(ids, vec!["beta", "alpha"]);
        assert_eq!(batch[1].body.get("value"), Some(&json!({"ip": "3.3.3.3"})));
    }

    #[test]
    fn unique_batch_is_untouched() {
        let (batch, duplicates) = build_batch(vec![record("a", "1"), record("b", "2")]);
        assert_eq!(duplicates, 0);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, "a");
    }
}
