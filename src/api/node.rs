use crate::api::config::NodeOptionsValidated;
use crate::api::{LogPayload, NodeConfig, Service};
use crate::client::{LogClient, PeerLog};
use crate::commitlog::{CommitLog, LogError};
use crate::doer::Doer;
use crate::logstore::{SledLogStore, StoreError};
use crate::server::{self, AppState};
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Node is one member of the replicated pair: the commit log, the
/// replication core, and the HTTP surface over both.
pub struct Node {
    doer: Arc<Doer>,
    commit_log: Arc<CommitLog>,
    router: Router,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("illegal node options: {0}")]
    IllegalOptions(&'static str),

    #[error("could not open log store: {0}")]
    StoreInitialization(#[from] StoreError),

    #[error("startup reconciliation failed: {0}")]
    Reconciliation(#[from] LogError),

    #[error("server failed: {0}")]
    Serve(#[from] std::io::Error),
}

impl Node {
    /// Open the durable log, reconcile with the peer, and return the
    /// assembled node with its catch-up task running.
    pub async fn create(config: NodeConfig, service: Arc<dyn Service>) -> Result<Node, NodeError> {
        let options =
            NodeOptionsValidated::try_from(config.options.clone()).map_err(NodeError::IllegalOptions)?;

        let store = SledLogStore::open(Path::new(&config.log_dir).join("log"))?;
        let commit_log = Arc::new(CommitLog::new(
            config.logger.clone(),
            service,
            config.apply_commits,
            Box::new(store),
        ));

        let peer = config
            .peer
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .map(|uri| {
                Arc::new(LogClient::new(
                    uri,
                    config.token.clone(),
                    options.peer_request_timeout,
                )) as Arc<dyn PeerLog>
            });

        let doer = Doer::start(
            config.logger.clone(),
            Arc::clone(&commit_log),
            peer,
            options.peer_attempts,
            options.sync_interval,
        )
        .await?;

        let state = Arc::new(AppState {
            logger: config.logger,
            doer: Arc::clone(&doer),
            commit_log: Arc::clone(&commit_log),
            token: config.token,
        });
        let router = server::router(state);

        Ok(Node {
            doer,
            commit_log,
            router,
        })
    }

    /// The node's HTTP surface, for serving or embedding elsewhere.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Submit an operation from inside the process, bypassing HTTP.
    pub async fn submit(&self, payload: LogPayload, ignore_version: bool) -> Result<(), LogError> {
        self.doer.submit(payload, ignore_version).await
    }

    /// Drop log records older than the last `keep` committed ones.
    pub fn compact(&self, keep: u64) -> Result<(), LogError> {
        self.commit_log.compact(keep)
    }

    /// Serve the node on `listener` until the process exits.
    pub async fn serve(self, listener: TcpListener) -> Result<(), NodeError> {
        axum::serve(listener, self.router).await?;
        Ok(())
    }
}
