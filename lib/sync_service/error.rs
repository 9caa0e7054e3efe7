use crate::node_client::NodeError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("scrape setup failed while {stage}: {source}")]
    Setup {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Tags a failure from the checkpoint/window phase, which is fatal to a run.
    pub fn during_setup(stage: &'static str, err: impl Into<Error>) -> Self {
        Error::Setup {
            stage,
            source: Box::new(err.into()),
        }
    }
}
