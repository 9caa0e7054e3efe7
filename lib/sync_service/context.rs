use super::sanitizer::RecordSanitizer;
use super::types::ScrapeConfig;
use crate::node_client::NameNode;
use crate::store::DocumentStore;

/// Everything one scrape run needs, threaded through the pipeline by reference.
///
/// Lives exactly as long as the run; nothing here is shared with later runs.
pub struct RunContext<'a, N, S>
where
    N: NameNode,
    S: DocumentStore,
{
    pub node: &'a N,
    pub store: &'a S,
    pub config: &'a ScrapeConfig,
    pub sanitizer: RecordSanitizer,
    /// Node height observed at the start of the run; every expiry is computed against it.
    pub block_height: i64,
}

impl<'a, N, S> RunContext<'a, N, S>
where
    N: NameNode,
    S: DocumentStore,
{
    pub fn new(node: &'a N, store: &'a S, config: &'a ScrapeConfig, block_height: i64) -> Self {
        Self {
            node,
            store,
            config,
            sanitizer: RecordSanitizer::new(config.namespace.clone()),
            block_height,
        }
    }
}
