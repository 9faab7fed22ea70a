mod api;
mod client;
mod commitlog;
mod doer;
mod logstore;
mod server;

pub use api::ApiResponse;
pub use api::LogPayload;
pub use api::NoOpService;
pub use api::Node;
pub use api::NodeConfig;
pub use api::NodeError;
pub use api::NodeOptions;
pub use api::Operation;
pub use api::Service;
pub use api::ServiceError;
pub use client::ApiClient;
pub use client::ClientError;
pub use client::LogClient;
pub use client::PeerLog;
pub use commitlog::LogError;
pub use logstore::InMemoryLogStore;
pub use logstore::LogStore;
pub use logstore::SledLogStore;
pub use logstore::StoreError;
