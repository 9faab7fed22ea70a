mod api_client;
mod log_client;

pub use api_client::ApiClient;
pub use api_client::ClientError;
pub use log_client::LogClient;
pub use log_client::PeerLog;
