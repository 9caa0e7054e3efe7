use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, warn};
use nonzero_ext::nonzero;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{FilterQuery, FilterResult, NameEntry, NameNode, NodeError, ScanQuery};
use crate::config::NodeRpcConfig;

/// Shared request budget for every call made against the node.
pub type NodeRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [serde_json::Value],
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

pub fn build_rate_limiter(requests_per_second: u32) -> NodeRateLimiter {
    let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(50u32));
    Arc::new(RateLimiter::direct(Quota::per_second(rps)))
}

/// JSON-RPC 1.0 client for a namecoind-compatible node.
pub struct JsonRpcNode {
    client: reqwest::Client,
    url: String,
    user: String,
    pass: String,
    next_id: AtomicU64,
    rate_limiter: NodeRateLimiter,
}

impl JsonRpcNode {
    pub fn new(config: &NodeRpcConfig, rate_limiter: NodeRateLimiter) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: config.endpoint(),
            user: config.user.clone(),
            pass: config.pass.clone(),
            next_id: AtomicU64::new(1),
            rate_limiter,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[serde_json::Value],
    ) -> Result<T, NodeError> {
        self.rate_limiter.until_ready().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "1.0",
            id,
            method,
            params,
        };
        debug!("rpc call {} id={} params={:?}", method, id, params);

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.pass))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(NodeError::UnexpectedStatus {
                method: method.to_string(),
                status: status.as_u16(),
            });
        }

        // namecoind reports RPC-level failures with a 500 status and a regular envelope, so the
        // body is inspected before the status code.
        let body = response.text().await?;
        let envelope: RpcResponse = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(err) if status.is_success() => return Err(err.into()),
            Err(_) => {
                warn!("node returned {} without a JSON-RPC body for {}", status, method);
                return Err(NodeError::UnexpectedStatus {
                    method: method.to_string(),
                    status: status.as_u16(),
                });
            }
        };

        if let Some(error) = envelope.error {
            return Err(NodeError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            });
        }
        if !status.is_success() {
            return Err(NodeError::UnexpectedStatus {
                method: method.to_string(),
                status: status.as_u16(),
            });
        }

        let result = envelope.result.ok_or_else(|| NodeError::UnexpectedShape {
            method: method.to_string(),
            detail: "response carried neither result nor error".to_string(),
        })?;
        serde_json::from_value(result).map_err(|err| NodeError::UnexpectedShape {
            method: method.to_string(),
            detail: err.to_string(),
        })
    }
}

impl NameNode for JsonRpcNode {
    fn block_count<'a>(&'a self) -> BoxFuture<'a, Result<i64, NodeError>> {
        Box::pin(async move { self.call("getblockcount", &[]).await })
    }

    fn info<'a>(&'a self) -> BoxFuture<'a, Result<serde_json::Value, NodeError>> {
        Box::pin(async move { self.call("getinfo", &[]).await })
    }

    fn show<'a>(
        &'a self,
        name: &'a str,
        namespace: &'a str,
    ) -> BoxFuture<'a, Result<NameEntry, NodeError>> {
        Box::pin(async move {
            let params = [serde_json::Value::from(format!("{namespace}/{name}"))];
            self.call("name_show", &params).await
        })
    }

    fn filter<'a>(
        &'a self,
        query: &'a FilterQuery,
    ) -> BoxFuture<'a, Result<FilterResult, NodeError>> {
        Box::pin(async move { self.call("name_filter", &query.to_params()).await })
    }

    fn scan<'a>(&'a self, query: &'a ScanQuery) -> BoxFuture<'a, Result<Vec<NameEntry>, NodeError>> {
        Box::pin(async move {
            let params = [
                serde_json::Value::from(format!("{}/{}", query.namespace, query.name)),
                serde_json::Value::from(query.max),
            ];
            self.call("name_scan", &params).await
        })
    }
}
