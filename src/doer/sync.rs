use crate::client::PeerLog;
use crate::commitlog::LogError;
use crate::doer::Doer;
use std::error::Error;
use std::sync::Arc;

impl Doer {
    /// Long-lived catch-up task for an out-of-sync peer.
    ///
    /// Each pass: drop any stale prepared record on the peer, compare
    /// committed versions, and push the records the peer is missing.
    /// `peer_in_sync` flips back on only when both sides are level while
    /// the lock is held. The per-record push runs without the lock, so
    /// new writes can land mid-pass; the next pass observes the longer
    /// tail.
    pub(super) async fn run_peer_sync(self: Arc<Self>) {
        let peer = match &self.peer {
            Some(peer) => Arc::clone(peer),
            None => return,
        };
        slog::info!(self.logger, "peer sync task started");

        let mut sleep = false;
        loop {
            if sleep {
                tokio::time::sleep(self.sync_interval).await;
            }
            sleep = false;

            {
                let state = self.state.lock().await;
                if state.peer_in_sync {
                    sleep = true;
                    continue;
                }
            }
            slog::info!(self.logger, "peer is out of sync, reconciling");

            // Whatever the peer has prepared predates this pass.
            let _ = peer.rollback().await;

            let peer_version = match peer.committed().await {
                Ok(committed) => committed.version,
                Err(err) if err.is_not_found() => 0,
                Err(err) => {
                    slog::warn!(self.logger, "peer committed version unavailable"; "error" => %err);
                    sleep = true;
                    continue;
                }
            };

            let local_version;
            {
                let mut state = self.state.lock().await;
                local_version = match self.commit_log.committed() {
                    Ok(committed) => committed.version,
                    Err(LogError::NotFound) => 0,
                    Err(err) => {
                        slog::warn!(self.logger, "local committed version unavailable"; "error" => %err);
                        sleep = true;
                        continue;
                    }
                };
                if local_version == peer_version {
                    state.peer_in_sync = true;
                    slog::info!(self.logger, "peer caught up"; "version" => local_version);
                    continue;
                }
            }

            for version in peer_version + 1..=local_version {
                if let Err(err) = self.push_record(peer.as_ref(), version).await {
                    slog::warn!(self.logger, "peer catch-up interrupted";
                        "version" => version, "error" => %err);
                    sleep = true;
                    break;
                }
            }
        }
    }

    async fn push_record(
        &self,
        peer: &dyn PeerLog,
        version: u64,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let payload = self.commit_log.record(version)?;
        peer.prepare(&payload).await?;
        peer.commit().await?;
        Ok(())
    }
}
