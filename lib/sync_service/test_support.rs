use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use super::types::{RetryPolicy, ScrapeConfig};
use crate::node_client::{
    FilterQuery, FilterResult, FilterStat, NameEntry, NameNode, NodeError, ScanQuery,
};
use crate::store::{BatchOutcome, Document, DocumentStore, NewDocument, StoreError, WriteAck};

pub(super) fn test_config(batch_size: u64, conflict_attempts: u32) -> ScrapeConfig {
    ScrapeConfig {
        batch_size,
        conflict_retry: RetryPolicy {
            max_attempts: conflict_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        },
        ..ScrapeConfig::default()
    }
}

pub(super) fn entry(name: &str, value: &str, expires_in: i64) -> NameEntry {
    NameEntry {
        name: format!("d/{name}"),
        value: value.to_string(),
        expires_in,
    }
}

pub(super) fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("fixture must be a JSON object")
}

enum PagePlan {
    Names(Vec<NameEntry>),
    Fail(String),
}

/// Scripted node: a fixed height, a stat count, pages keyed by start offset and a `name_show`
/// table keyed by bare name.
pub(super) struct MockNode {
    block_height: Result<i64, String>,
    stat_count: u64,
    pages: Mutex<HashMap<u64, PagePlan>>,
    shown: Mutex<HashMap<String, NameEntry>>,
    filter_calls: Mutex<Vec<FilterQuery>>,
    show_calls: Mutex<Vec<String>>,
}

impl MockNode {
    pub(super) fn new(block_height: i64, stat_count: u64) -> Self {
        Self {
            block_height: Ok(block_height),
            stat_count,
            pages: Mutex::new(HashMap::new()),
            shown: Mutex::new(HashMap::new()),
            filter_calls: Mutex::new(Vec::new()),
            show_calls: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn unreachable() -> Self {
        let mut node = Self::new(0, 0);
        node.block_height = Err("connection refused".to_string());
        node
    }

    pub(super) fn with_page(self, start: u64, entries: Vec<NameEntry>) -> Self {
        self.pages
            .lock()
            .expect("pages mutex poisoned")
            .insert(start, PagePlan::Names(entries));
        self
    }

    pub(super) fn with_failing_page(self, start: u64) -> Self {
        self.pages
            .lock()
            .expect("pages mutex poisoned")
            .insert(start, PagePlan::Fail(format!("page {start} timed out")));
        self
    }

    pub(super) fn with_shown(self, entry: NameEntry) -> Self {
        let bare = entry
            .name
            .strip_prefix("d/")
            .unwrap_or(&entry.name)
            .to_string();
        self.shown
            .lock()
            .expect("shown mutex poisoned")
            .insert(bare, entry);
        self
    }

    pub(super) fn page_starts(&self) -> Vec<u64> {
        self.filter_calls
            .lock()
            .expect("filter_calls mutex poisoned")
            .iter()
            .filter(|query| !query.stat)
            .map(|query| query.start)
            .collect()
    }

    pub(super) fn filter_calls(&self) -> Vec<FilterQuery> {
        self.filter_calls
            .lock()
            .expect("filter_calls mutex poisoned")
            .clone()
    }

    pub(super) fn show_calls(&self) -> Vec<String> {
        self.show_calls
            .lock()
            .expect("show_calls mutex poisoned")
            .clone()
    }
}

impl NameNode for MockNode {
    fn block_count<'a>(&'a self) -> BoxFuture<'a, Result<i64, NodeError>> {
        Box::pin(async move {
            self.block_height
                .clone()
                .map_err(NodeError::ConnectError)
        })
    }

    fn info<'a>(&'a self) -> BoxFuture<'a, Result<Value, NodeError>> {
        Box::pin(async move { Ok(serde_json::json!({"version": 38000})) })
    }

    fn show<'a>(
        &'a self,
        name: &'a str,
        namespace: &'a str,
    ) -> BoxFuture<'a, Result<NameEntry, NodeError>> {
        Box::pin(async move {
            self.show_calls
                .lock()
                .expect("show_calls mutex poisoned")
                .push(name.to_string());
            self.shown
                .lock()
                .expect("shown mutex poisoned")
                .get(name)
                .cloned()
                .ok_or_else(|| NodeError::Rpc {
                    method: "name_show".to_string(),
                    code: -4,
                    message: format!("failed to read from name DB: {namespace}/{name}"),
                })
        })
    }

    fn filter<'a>(
        &'a self,
        query: &'a FilterQuery,
    ) -> BoxFuture<'a, Result<FilterResult, NodeError>> {
        Box::pin(async move {
            self.filter_calls
                .lock()
                .expect("filter_calls mutex poisoned")
                .push(query.clone());

            if query.stat {
                return Ok(FilterResult::Stat(FilterStat {
                    count: self.stat_count,
                    blocks: Some(query.age as i64),
                }));
            }

            match self
                .pages
                .lock()
                .expect("pages mutex poisoned")
                .get(&query.start)
            {
                Some(PagePlan::Names(entries)) => Ok(FilterResult::Names(entries.clone())),
                Some(PagePlan::Fail(message)) => Err(NodeError::ConnectError(message.clone())),
                None => Ok(FilterResult::Names(Vec::new())),
            }
        })
    }

    fn scan<'a>(&'a self, _query: &'a ScanQuery) -> BoxFuture<'a, Result<Vec<NameEntry>, NodeError>> {
        Box::pin(async move { Ok(Vec::new()) })
    }
}

struct StoredDoc {
    generation: u32,
    body: Map<String, Value>,
}

impl StoredDoc {
    fn rev(&self) -> String {
        format!("{}-mock", self.generation)
    }
}

/// In-memory revision-checked store.
///
/// Batch writes behave like CouchDB's `_bulk_docs` without revisions: new ids are saved,
/// existing ids come back as conflicts.
#[derive(Default)]
pub(super) struct MockStore {
    docs: Mutex<HashMap<String, StoredDoc>>,
    forced_update_conflicts: Mutex<HashMap<String, u32>>,
    failing_batches: Mutex<HashSet<usize>>,
    fail_gets: Mutex<bool>,
    batch_calls: Mutex<Vec<Vec<String>>>,
    get_calls: Mutex<Vec<String>>,
    create_calls: Mutex<Vec<String>>,
    update_calls: Mutex<Vec<String>>,
}

impl MockStore {
    pub(super) fn with_doc(self, id: &str, body: Map<String, Value>) -> Self {
        self.docs
            .lock()
            .expect("docs mutex poisoned")
            .insert(id.to_string(), StoredDoc { generation: 1, body });
        self
    }

    pub(super) fn with_record(self, id: &str, value: Value) -> Self {
        let mut body = Map::new();
        body.insert("value".to_string(), value);
        self.with_doc(id, body)
    }

    /// Rejects the next `count` updates of `id` with a conflict, as if another writer raced us.
    pub(super) fn with_update_conflicts(self, id: &str, count: u32) -> Self {
        self.forced_update_conflicts
            .lock()
            .expect("conflicts mutex poisoned")
            .insert(id.to_string(), count);
        self
    }

    /// Fails the `call_index`-th (zero-based) batch write at the transport level.
    pub(super) fn with_failing_batch(self, call_index: usize) -> Self {
        self.failing_batches
            .lock()
            .expect("failing_batches mutex poisoned")
            .insert(call_index);
        self
    }

    pub(super) fn with_failing_gets(self) -> Self {
        *self.fail_gets.lock().expect("fail_gets mutex poisoned") = true;
        self
    }

    pub(super) fn body(&self, id: &str) -> Option<Map<String, Value>> {
        self.docs
            .lock()
            .expect("docs mutex poisoned")
            .get(id)
            .map(|doc| doc.body.clone())
    }

    pub(super) fn record_value(&self, id: &str) -> Option<Value> {
        self.body(id).and_then(|body| body.get("value").cloned())
    }

    pub(super) fn rev(&self, id: &str) -> Option<String> {
        self.docs
            .lock()
            .expect("docs mutex poisoned")
            .get(id)
            .map(StoredDoc::rev)
    }

    pub(super) fn batch_calls(&self) -> Vec<Vec<String>> {
        self.batch_calls
            .lock()
            .expect("batch_calls mutex poisoned")
            .clone()
    }

    pub(super) fn get_calls(&self) -> Vec<String> {
        self.get_calls.lock().expect("get_calls mutex poisoned").clone()
    }

    pub(super) fn create_calls(&self) -> Vec<String> {
        self.create_calls
            .lock()
            .expect("create_calls mutex poisoned")
            .clone()
    }

    pub(super) fn update_calls(&self) -> Vec<String> {
        self.update_calls
            .lock()
            .expect("update_calls mutex poisoned")
            .clone()
    }
}

impl DocumentStore for MockStore {
    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Document, StoreError>> {
        Box::pin(async move {
            self.get_calls
                .lock()
                .expect("get_calls mutex poisoned")
                .push(id.to_string());
            if *self.fail_gets.lock().expect("fail_gets mutex poisoned") {
                return Err(StoreError::UnexpectedStatus {
                    operation: "get".to_string(),
                    status: 500,
                    body: "internal".to_string(),
                });
            }

            let docs = self.docs.lock().expect("docs mutex poisoned");
            let doc = docs
                .get(id)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
            Ok(Document {
                id: id.to_string(),
                rev: doc.rev(),
                body: doc.body.clone(),
            })
        })
    }

    fn create<'a>(
        &'a self,
        id: &'a str,
        body: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<WriteAck, StoreError>> {
        Box::pin(async move {
            self.create_calls
                .lock()
                .expect("create_calls mutex poisoned")
                .push(id.to_string());

            let mut docs = self.docs.lock().expect("docs mutex poisoned");
            if docs.contains_key(id) {
                return Err(StoreError::Conflict { id: id.to_string() });
            }
            let doc = StoredDoc {
                generation: 1,
                body: body.clone(),
            };
            let rev = doc.rev();
            docs.insert(id.to_string(), doc);
            Ok(WriteAck {
                id: id.to_string(),
                rev,
            })
        })
    }

    fn update<'a>(
        &'a self,
        id: &'a str,
        rev: &'a str,
        body: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<WriteAck, StoreError>> {
        Box::pin(async move {
            self.update_calls
                .lock()
                .expect("update_calls mutex poisoned")
                .push(id.to_string());

            let mut docs = self.docs.lock().expect("docs mutex poisoned");
            {
                let mut forced = self
                    .forced_update_conflicts
                    .lock()
                    .expect("conflicts mutex poisoned");
                if let Some(remaining) = forced.get_mut(id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        // Simulate the competing writer that won the race.
                        if let Some(doc) = docs.get_mut(id) {
                            doc.generation += 1;
                        }
                        return Err(StoreError::Conflict { id: id.to_string() });
                    }
                }
            }

            let Some(doc) = docs.get_mut(id) else {
                return Err(StoreError::NotFound { id: id.to_string() });
            };
            if doc.rev() != rev {
                return Err(StoreError::Conflict { id: id.to_string() });
            }
            doc.generation += 1;
            doc.body = body.clone();
            Ok(WriteAck {
                id: id.to_string(),
                rev: doc.rev(),
            })
        })
    }

    fn save_batch<'a>(
        &'a self,
        batch: &'a [NewDocument],
    ) -> BoxFuture<'a, Result<Vec<BatchOutcome>, StoreError>> {
        Box::pin(async move {
            let call_index = {
                let mut calls = self.batch_calls.lock().expect("batch_calls mutex poisoned");
                calls.push(batch.iter().map(|doc| doc.id.clone()).collect());
                calls.len() - 1
            };
            if self
                .failing_batches
                .lock()
                .expect("failing_batches mutex poisoned")
                .contains(&call_index)
            {
                return Err(StoreError::UnexpectedStatus {
                    operation: "save_batch".to_string(),
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }

            let mut docs = self.docs.lock().expect("docs mutex poisoned");
            let outcomes = batch
                .iter()
                .map(|new_doc| {
                    if docs.contains_key(&new_doc.id) {
                        BatchOutcome::conflict(new_doc.id.clone())
                    } else {
                        let doc = StoredDoc {
                            generation: 1,
                            body: new_doc.body.clone(),
                        };
                        let rev = doc.rev();
                        docs.insert(new_doc.id.clone(), doc);
                        BatchOutcome::saved(new_doc.id.clone(), rev)
                    }
                })
                .collect();
            Ok(outcomes)
        })
    }
}
