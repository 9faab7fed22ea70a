use slog::Drain;
use std::net::SocketAddr;
use std::sync::Arc;
use tandem::{Node, NodeConfig, NodeOptions};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:7420".to_string())
        .parse()?;
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./tandem-data".to_string());
    let peer = std::env::var("PEER").ok().filter(|uri| !uri.is_empty());
    let token = std::env::var("API_TOKEN").unwrap_or_default();
    let apply_commits = std::env::var("APPLY_COMMITS")
        .map(|value| value != "false")
        .unwrap_or(true);

    let logger = match std::env::var("LOG_FILE") {
        Ok(prefix) => create_root_logger_for_file(&prefix)?,
        Err(_) => create_root_logger_for_stdout(listen_addr),
    };

    slog::info!(logger, "starting node";
        "listen" => %listen_addr,
        "peer" => peer.as_deref().unwrap_or("<none>"),
        "apply_commits" => apply_commits);

    let node = Node::create(
        NodeConfig {
            log_dir,
            apply_commits,
            token,
            peer,
            logger: logger.clone(),
            options: NodeOptions::default(),
        },
        Arc::new(counter_impl::CounterService::default()),
    )
    .await?;

    let listener = TcpListener::bind(listen_addr).await?;
    node.serve(listener).await?;
    Ok(())
}

fn create_root_logger_for_stdout(listen_addr: SocketAddr) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("listen" => listen_addr.to_string()))
}

fn create_root_logger_for_file(prefix: &str) -> Result<slog::Logger, std::io::Error> {
    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let log_path = format!("{}_{}.log", prefix, now);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)?;

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Ok(slog::Logger::root(drain, slog::o!()))
}

mod counter_impl {
    use serde::Deserialize;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tandem::{Operation, Service, ServiceError};

    #[derive(Deserialize)]
    struct AddRequest {
        key: String,
        value: i64,
    }

    /// Keyed counter demonstrating the service contract: `add` operations
    /// accumulate per-key totals, and the advisory lock table rejects
    /// concurrent writes to the same key.
    #[derive(Default)]
    pub struct CounterService {
        counts: Mutex<HashMap<String, i64>>,
        locked_keys: Mutex<HashSet<String>>,
    }

    impl CounterService {
        fn decode(op: &Operation) -> Result<AddRequest, ServiceError> {
            if op.method != "add" {
                return Err(format!("unknown method {:?}", op.method).into());
            }
            Ok(serde_json::from_str(op.data.get())?)
        }
    }

    impl Service for CounterService {
        fn validate(&self, op: &Operation) -> Result<(), ServiceError> {
            Self::decode(op).map(|_| ())
        }

        fn apply(&self, _version: u64, op: &Operation) -> Result<(), ServiceError> {
            let request = Self::decode(op)?;
            *self
                .counts
                .lock()
                .unwrap()
                .entry(request.key)
                .or_insert(0) += request.value;
            Ok(())
        }

        fn lock_resources(&self, op: &Operation) -> bool {
            let request = match Self::decode(op) {
                Ok(request) => request,
                Err(_) => return false,
            };
            self.locked_keys.lock().unwrap().insert(request.key)
        }

        fn unlock_resources(&self, op: &Operation) {
            if let Ok(request) = Self::decode(op) {
                self.locked_keys.lock().unwrap().remove(&request.key);
            }
        }
    }
}
