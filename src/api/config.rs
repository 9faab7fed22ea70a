use std::time::Duration;

/// NodeConfig wires one node together.
pub struct NodeConfig {
    /// Directory holding the durable log (created if missing).
    pub log_dir: String,
    /// Whether committed operations are applied to the service. The
    /// primary applies; a mirror that only stores records does not.
    pub apply_commits: bool,
    /// Shared bearer token checked on every request and attached to every
    /// peer request. Empty disables authentication.
    pub token: String,
    /// Base URI of the peer node. `None` disables replication.
    pub peer: Option<String>,
    pub logger: slog::Logger,
    pub options: NodeOptions,
}

/// Optional knobs; unset fields take defaults.
#[derive(Clone, Default)]
pub struct NodeOptions {
    /// Back-to-back attempts for each peer write inside a client request.
    pub peer_attempts: Option<u32>,
    /// Pause between catch-up passes of the background sync task.
    pub sync_interval: Option<Duration>,
    /// Timeout for individual peer requests.
    pub peer_request_timeout: Option<Duration>,
}

pub(crate) struct NodeOptionsValidated {
    pub peer_attempts: u32,
    pub sync_interval: Duration,
    pub peer_request_timeout: Duration,
}

impl NodeOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.peer_attempts == 0 {
            return Err("peer attempt count must be at least 1");
        }
        if self.peer_request_timeout >= self.sync_interval {
            return Err("peer request timeout must be less than the sync interval");
        }
        Ok(())
    }
}

impl TryFrom<NodeOptions> for NodeOptionsValidated {
    type Error = &'static str;

    fn try_from(options: NodeOptions) -> Result<Self, Self::Error> {
        let values = NodeOptionsValidated {
            peer_attempts: options.peer_attempts.unwrap_or(3),
            sync_interval: options.sync_interval.unwrap_or(Duration::from_secs(3)),
            peer_request_timeout: options
                .peer_request_timeout
                .unwrap_or(Duration::from_secs(1)),
        };

        values.validate()?;
        Ok(values)
    }
}
