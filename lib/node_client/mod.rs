pub mod rpc;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use rpc::JsonRpcNode;

/// Namespace every scraped name lives under.
pub const DEFAULT_NAMESPACE: &str = "d";
/// Page size `name_scan` uses when the caller does not ask for one.
pub const DEFAULT_SCAN_MAX: u32 = 500;

/// One name/value entry as returned by `name_show`, `name_filter` and `name_scan`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub expires_in: i64,
}

/// Result of a `name_filter` call issued with `stat`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterStat {
    pub count: u64,
    #[serde(default)]
    pub blocks: Option<i64>,
}

/// `name_filter` answers with either a page of names or, for stat queries, a count.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum FilterResult {
    Names(Vec<NameEntry>),
    Stat(FilterStat),
}

/// Arguments for `name_filter`.
///
/// Maps to the positional params `[regex, age, start, max]`, with a trailing `"stat"` when
/// `stat` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterQuery {
    pub regex: String,
    pub age: u64,
    pub start: u64,
    pub max: u64,
    pub stat: bool,
}

impl FilterQuery {
    pub fn to_params(&self) -> Vec<serde_json::Value> {
        let mut params = vec![
            serde_json::Value::from(self.regex.clone()),
            serde_json::Value::from(self.age),
            serde_json::Value::from(self.start),
            serde_json::Value::from(self.max),
        ];
        if self.stat {
            params.push(serde_json::Value::from("stat"));
        }
        params
    }
}

/// Arguments for `name_scan`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanQuery {
    pub name: String,
    pub namespace: String,
    pub max: u32,
}

impl ScanQuery {
    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            max: DEFAULT_SCAN_MAX,
        }
    }
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("connection error: {0}")]
    ConnectError(String),
    #[error("unexpected HTTP status from node for {method}: {status}")]
    UnexpectedStatus { method: String, status: u16 },
    #[error("node rejected {method} (code {code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
    #[error("unexpected response shape for {method}: {detail}")]
    UnexpectedShape { method: String, detail: String },
    #[error(transparent)]
    JsonParseError(#[from] serde_json::Error),
    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

/// Read-only view of a namecoin-style node.
///
/// Kept as a trait so the sync pipeline can be driven by scripted nodes in tests.
pub trait NameNode: Send + Sync {
    fn block_count<'a>(&'a self) -> BoxFuture<'a, Result<i64, NodeError>>;

    fn info<'a>(&'a self) -> BoxFuture<'a, Result<serde_json::Value, NodeError>>;

    /// Looks up one name. `name` is given without its namespace prefix.
    fn show<'a>(
        &'a self,
        name: &'a str,
        namespace: &'a str,
    ) -> BoxFuture<'a, Result<NameEntry, NodeError>>;

    fn filter<'a>(&'a self, query: &'a FilterQuery)
        -> BoxFuture<'a, Result<FilterResult, NodeError>>;

    fn scan<'a>(&'a self, query: &'a ScanQuery) -> BoxFuture<'a, Result<Vec<NameEntry>, NodeError>>;
}

impl<T> NameNode for Arc<T>
where
    T: NameNode + ?Sized,
{
    fn block_count<'a>(&'a self) -> BoxFuture<'a, Result<i64, NodeError>> {
        (**self).block_count()
    }

    fn info<'a>(&'a self) -> BoxFuture<'a, Result<serde_json::Value, NodeError>> {
        (**self).info()
    }

    fn show<'a>(
        &'a self,
        name: &'a str,
        namespace: &'a str,
    ) -> BoxFuture<'a, Result<NameEntry, NodeError>> {
        (**self).show(name, namespace)
    }

    fn filter<'a>(
        &'a self,
        query: &'a FilterQuery,
    ) -> BoxFuture<'a, Result<FilterResult, NodeError>> {
        (**self).filter(query)
    }

    fn scan<'a>(&'a self, query: &'a ScanQuery) -> BoxFuture<'a, Result<Vec<NameEntry>, NodeError>> {
        (**self).scan(query)
    }
}
