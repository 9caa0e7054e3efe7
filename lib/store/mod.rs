pub mod couch;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use couch::CouchStore;

/// Field of a record document holding the normalized name value.
pub const RECORD_VALUE_FIELD: &str = "value";

/// A stored document together with its revision token.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev")]
    pub rev: String,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Document {
    /// Returns the normalized value of a record document, if it holds an object.
    pub fn record_value(&self) -> Option<&Map<String, Value>> {
        self.body.get(RECORD_VALUE_FIELD).and_then(Value::as_object)
    }
}

/// A document submitted through a batch write. Carries no revision, so existing ids
/// come back as conflicts.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NewDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl NewDocument {
    pub fn record(id: impl Into<String>, value: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            body: record_body(value),
        }
    }
}

/// Wraps a normalized value into the body layout used for record documents.
pub fn record_body(value: Map<String, Value>) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert(RECORD_VALUE_FIELD.to_string(), Value::Object(value));
    body
}

/// Acknowledgement for a single-document write.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub id: String,
    pub rev: String,
}

/// Per-document result of a batch write, in submission order.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BatchOutcome {
    pub fn saved(id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: Some(rev.into()),
            error: None,
            reason: None,
        }
    }

    pub fn conflict(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            error: Some("conflict".to_string()),
            reason: Some("Document update conflict.".to_string()),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.error.as_deref() == Some("conflict")
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document {id} not found")]
    NotFound { id: String },
    #[error("revision conflict while writing {id}")]
    Conflict { id: String },
    #[error("unexpected HTTP status from store during {operation}: {status} ({body})")]
    UnexpectedStatus {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("invalid store url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    JsonParseError(#[from] serde_json::Error),
    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Revision-checked document store.
///
/// `update` fails with [`StoreError::Conflict`] when `rev` is no longer current.
pub trait DocumentStore: Send + Sync {
    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Document, StoreError>>;

    fn create<'a>(
        &'a self,
        id: &'a str,
        body: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<WriteAck, StoreError>>;

    fn update<'a>(
        &'a self,
        id: &'a str,
        rev: &'a str,
        body: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<WriteAck, StoreError>>;

    fn save_batch<'a>(
        &'a self,
        docs: &'a [NewDocument],
    ) -> BoxFuture<'a, Result<Vec<BatchOutcome>, StoreError>>;
}

impl<T> DocumentStore for Arc<T>
where
    T: DocumentStore + ?Sized,
{
    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Document, StoreError>> {
        (**self).get(id)
    }

    fn create<'a>(
        &'a self,
        id: &'a str,
        body: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<WriteAck, StoreError>> {
        (**self).create(id, body)
    }

    fn update<'a>(
        &'a self,
        id: &'a str,
        rev: &'a str,
        body: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<WriteAck, StoreError>> {
        (**self).update(id, rev, body)
    }

    fn save_batch<'a>(
        &'a self,
        docs: &'a [NewDocument],
    ) -> BoxFuture<'a, Result<Vec<BatchOutcome>, StoreError>> {
        (**self).save_batch(docs)
    }
}
