use crate::api::LogPayload;
use crate::client::{ApiClient, ClientError};
use async_trait::async_trait;
use std::time::Duration;

/// PeerLog is the remote commit log as the replication core sees it: the
/// same prepare/commit surface, reached over the wire.
#[async_trait]
pub trait PeerLog: Send + Sync {
    async fn prepared(&self) -> Result<LogPayload, ClientError>;
    async fn committed(&self) -> Result<LogPayload, ClientError>;
    async fn prepare(&self, payload: &LogPayload) -> Result<(), ClientError>;
    async fn commit(&self) -> Result<(), ClientError>;
    async fn rollback(&self) -> Result<(), ClientError>;
    async fn get_record(&self, version: u64) -> Result<LogPayload, ClientError>;
}

/// LogClient drives a remote node's `/log` routes.
pub struct LogClient {
    client: ApiClient,
}

impl LogClient {
    pub fn new(base_uri: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        LogClient {
            client: ApiClient::new(base_uri, token, timeout),
        }
    }
}

#[async_trait]
impl PeerLog for LogClient {
    async fn prepared(&self) -> Result<LogPayload, ClientError> {
        self.client.get("/log/prepare").await
    }

    async fn committed(&self) -> Result<LogPayload, ClientError> {
        self.client.get("/log/commit").await
    }

    async fn prepare(&self, payload: &LogPayload) -> Result<(), ClientError> {
        self.client.post("/log/prepare", Some(payload)).await
    }

    async fn commit(&self) -> Result<(), ClientError> {
        self.client.post::<()>("/log/commit", None).await
    }

    async fn rollback(&self) -> Result<(), ClientError> {
        self.client.post::<()>("/log/rollback", None).await
    }

    async fn get_record(&self, version: u64) -> Result<LogPayload, ClientError> {
        self.client.get(&format!("/log/record/{}", version)).await
    }
}
