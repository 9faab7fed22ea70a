use crate::api::{LogPayload, Operation};
use crate::client::PeerLog;
use crate::commitlog::{CommitLog, LogError};
use std::process;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

/// Doer is the replication state machine. It owns the serialized write
/// path, the startup reconciliation with the peer, and the background
/// catch-up task.
///
/// The primary is the authority: peer failures never block a write, they
/// flip the peer to out-of-sync and leave re-convergence to the catch-up
/// task.
pub struct Doer {
    pub(super) logger: slog::Logger,
    pub(super) commit_log: Arc<CommitLog>,
    pub(super) peer: Option<Arc<dyn PeerLog>>,
    pub(super) peer_attempts: u32,
    pub(super) sync_interval: Duration,
    /// Guards `peer_in_sync` and serializes every write. Held across peer
    /// RPCs on purpose: the peer must observe local commit order.
    pub(super) state: Mutex<DoerState>,
}

pub(super) struct DoerState {
    pub(super) peer_in_sync: bool,
}

enum PeerWrite<'a> {
    Prepare(&'a LogPayload),
    Commit,
}

impl Doer {
    /// Reconcile with the peer, recover any crash-orphaned prepared
    /// record, and spawn the catch-up task.
    pub(crate) async fn start(
        logger: slog::Logger,
        commit_log: Arc<CommitLog>,
        peer: Option<Arc<dyn PeerLog>>,
        peer_attempts: u32,
        sync_interval: Duration,
    ) -> Result<Arc<Self>, LogError> {
        let mut peer_in_sync = true;
        if let Some(peer) = &peer {
            peer_in_sync = reconcile(&logger, &commit_log, peer.as_ref()).await?;
        }

        // Roll forward a prepared-but-uncommitted record left by a crash.
        // With nothing prepared this is a no-op.
        commit_log.commit()?;

        let doer = Arc::new(Doer {
            logger,
            commit_log,
            peer,
            peer_attempts,
            sync_interval,
            state: Mutex::new(DoerState { peer_in_sync }),
        });

        if doer.peer.is_some() {
            tokio::spawn(Arc::clone(&doer).run_peer_sync());
        }

        Ok(doer)
    }

    /// Sequence, replicate, commit, and apply one operation.
    ///
    /// With `ignore_version` the payload is assigned the next version;
    /// otherwise the caller-supplied version must be the next one.
    pub async fn submit(
        &self,
        mut payload: LogPayload,
        ignore_version: bool,
    ) -> Result<(), LogError> {
        let mut state = self.state.lock().await;

        self.commit_log.lock_resources(&payload.op)?;
        let _unlock = UnlockOnDrop {
            commit_log: &self.commit_log,
            op: payload.op.clone(),
        };

        let committed_version = match self.commit_log.committed() {
            Ok(committed) => committed.version,
            Err(LogError::NotFound) => 0,
            Err(err) => {
                slog::error!(self.logger, "could not read committed version"; "error" => %err);
                return Err(err);
            }
        };

        if ignore_version {
            payload.version = committed_version + 1;
        }

        self.commit_log.prepare(&payload)?;

        if let Some(peer) = &self.peer {
            if state.peer_in_sync
                && !self
                    .peer_write_with_retries(peer.as_ref(), PeerWrite::Prepare(&payload))
                    .await
            {
                slog::warn!(self.logger, "marking peer out of sync and continuing");
                state.peer_in_sync = false;
            }
        }

        if let Err(commit_err) = self.commit_log.commit() {
            slog::error!(self.logger, "local commit failed, rolling back"; "error" => %commit_err);
            if let Err(rollback_err) = self.commit_log.rollback() {
                // A dirty prepared record would poison every later
                // prepare; there is no sane way to continue.
                slog::crit!(self.logger, "rollback failed"; "error" => %rollback_err);
                process::exit(1);
            }
            return Err(commit_err);
        }

        if let Some(peer) = &self.peer {
            if state.peer_in_sync
                && !self
                    .peer_write_with_retries(peer.as_ref(), PeerWrite::Commit)
                    .await
            {
                slog::warn!(self.logger, "marking peer out of sync and continuing");
                state.peer_in_sync = false;
            }
        }

        Ok(())
    }

    async fn peer_write_with_retries(&self, peer: &dyn PeerLog, write: PeerWrite<'_>) -> bool {
        for attempt in 1..=self.peer_attempts {
            let result = match &write {
                PeerWrite::Prepare(payload) => peer.prepare(payload).await,
                PeerWrite::Commit => peer.commit().await,
            };
            match result {
                Ok(()) => return true,
                Err(err) => {
                    slog::warn!(self.logger, "peer write failed";
                        "attempt" => attempt, "error" => %err);
                }
            }
        }
        false
    }
}

struct UnlockOnDrop<'a> {
    commit_log: &'a CommitLog,
    op: Operation,
}

impl Drop for UnlockOnDrop<'_> {
    fn drop(&mut self) {
        self.commit_log.unlock_resources(&self.op);
    }
}

/// Bring the peer's committed sequence level with ours (or ours with the
/// peer's), then clear straggler prepared records on both sides.
///
/// `Ok(false)` flags the peer as unreachable or uncooperative, deferring
/// reconciliation to the catch-up task. `Err` means this node cannot
/// safely start.
async fn reconcile(
    logger: &slog::Logger,
    commit_log: &CommitLog,
    peer: &dyn PeerLog,
) -> Result<bool, LogError> {
    let peer_version = match peer.committed().await {
        Ok(committed) => committed.version,
        Err(err) if err.is_not_found() => 0,
        Err(err) => {
            slog::warn!(logger, "peer committed version unavailable"; "error" => %err);
            return Ok(false);
        }
    };

    let local_version = match commit_log.committed() {
        Ok(committed) => committed.version,
        Err(LogError::NotFound) => 0,
        Err(err) => return Err(err),
    };

    if peer_version <= local_version {
        // Push the records the peer is missing.
        for version in peer_version + 1..=local_version {
            let payload = match commit_log.record(version) {
                Ok(payload) => payload,
                Err(err) => {
                    slog::warn!(logger, "could not read record for peer push";
                        "version" => version, "error" => %err);
                    return Ok(false);
                }
            };
            if let Err(err) = peer.prepare(&payload).await {
                slog::warn!(logger, "startup push: peer prepare failed";
                    "version" => version, "error" => %err);
                return Ok(false);
            }
            if let Err(err) = peer.commit().await {
                slog::warn!(logger, "startup push: peer commit failed";
                    "version" => version, "error" => %err);
                return Ok(false);
            }
        }
    } else {
        // The peer is ahead; replay its records locally. Failure here is
        // fatal: a primary that is behind its peer and unable to catch up
        // must not serve.
        commit_log.rollback()?;
        for version in local_version + 1..=peer_version {
            let payload = peer.get_record(version).await.map_err(|err| {
                LogError::Internal(format!("peer record {} unavailable: {}", version, err))
            })?;
            commit_log.prepare(&payload)?;
            commit_log.commit()?;
        }
    }

    // Committed versions are level. A prepared record on either side is a
    // write that never completed; drop both.
    let peer_prepared = match peer.prepared().await {
        Ok(prepared) => prepared.version,
        Err(err) if err.is_not_found() => 0,
        Err(err) => {
            slog::warn!(logger, "peer prepared version unavailable"; "error" => %err);
            return Ok(false);
        }
    };
    let local_prepared = match commit_log.prepared() {
        Ok(prepared) => prepared.version,
        Err(LogError::NotFound) => 0,
        Err(err) => return Err(err),
    };

    if local_prepared > 0 || peer_prepared > 0 {
        commit_log.rollback()?;
        if let Err(err) = peer.rollback().await {
            slog::warn!(logger, "peer rollback failed during startup"; "error" => %err);
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Service, ServiceError};
    use crate::client::ClientError;
    use crate::logstore::{InMemoryLogStore, LogStore};
    use async_trait::async_trait;
    use http::StatusCode;
    use serde_json::value::RawValue;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingService {
        applied: StdMutex<Vec<u64>>,
        refuse_locks: AtomicBool,
    }

    impl Service for RecordingService {
        fn validate(&self, _op: &Operation) -> Result<(), ServiceError> {
            Ok(())
        }

        fn apply(&self, version: u64, _op: &Operation) -> Result<(), ServiceError> {
            self.applied.lock().unwrap().push(version);
            Ok(())
        }

        fn lock_resources(&self, _op: &Operation) -> bool {
            !self.refuse_locks.load(Ordering::SeqCst)
        }

        fn unlock_resources(&self, _op: &Operation) {}
    }

    /// Peer double: a faithful in-memory remote commit log with failure
    /// injection and call counting.
    #[derive(Default)]
    struct ScriptedPeer {
        log: StdMutex<RemoteLog>,
        fail_prepare: AtomicBool,
        fail_commit: AtomicBool,
        prepare_calls: AtomicU32,
    }

    #[derive(Default)]
    struct RemoteLog {
        records: BTreeMap<u64, LogPayload>,
        prepared: Option<LogPayload>,
        committed: u64,
    }

    impl ScriptedPeer {
        fn seed_committed(&self, versions: std::ops::RangeInclusive<u64>) {
            let mut log = self.log.lock().unwrap();
            for version in versions {
                log.records.insert(version, payload(version, "set"));
                log.committed = version;
            }
        }

        fn committed_version(&self) -> u64 {
            self.log.lock().unwrap().committed
        }

        fn prepared_version(&self) -> Option<u64> {
            self.log.lock().unwrap().prepared.as_ref().map(|p| p.version)
        }
    }

    fn unavailable() -> ClientError {
        ClientError::Api {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "injected failure".to_string(),
        }
    }

    fn not_found() -> ClientError {
        ClientError::Api {
            status: StatusCode::NOT_FOUND,
            message: "not found".to_string(),
        }
    }

    #[async_trait]
    impl PeerLog for ScriptedPeer {
        async fn prepared(&self) -> Result<LogPayload, ClientError> {
            self.log
                .lock()
                .unwrap()
                .prepared
                .clone()
                .ok_or_else(not_found)
        }

        async fn committed(&self) -> Result<LogPayload, ClientError> {
            let log = self.log.lock().unwrap();
            if log.committed == 0 {
                return Err(not_found());
            }
            Ok(log.records[&log.committed].clone())
        }

        async fn prepare(&self, incoming: &LogPayload) -> Result<(), ClientError> {
            self.prepare_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_prepare.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            let mut log = self.log.lock().unwrap();
            if log.prepared.is_some() || incoming.version != log.committed + 1 {
                return Err(ClientError::Api {
                    status: StatusCode::BAD_REQUEST,
                    message: "bad version".to_string(),
                });
            }
            log.prepared = Some(incoming.clone());
            Ok(())
        }

        async fn commit(&self) -> Result<(), ClientError> {
            if self.fail_commit.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            let mut log = self.log.lock().unwrap();
            if let Some(prepared) = log.prepared.take() {
                log.committed = prepared.version;
                log.records.insert(prepared.version, prepared);
            }
            Ok(())
        }

        async fn rollback(&self) -> Result<(), ClientError> {
            self.log.lock().unwrap().prepared = None;
            Ok(())
        }

        async fn get_record(&self, version: u64) -> Result<LogPayload, ClientError> {
            self.log
                .lock()
                .unwrap()
                .records
                .get(&version)
                .cloned()
                .ok_or_else(|| ClientError::Api {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: format!("no record {}", version),
                })
        }
    }

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn payload(version: u64, method: &str) -> LogPayload {
        LogPayload {
            version,
            op: Operation {
                method: method.to_string(),
                data: RawValue::from_string(r#"{"k":"v"}"#.to_string()).unwrap(),
            },
        }
    }

    /// A store with `versions` already committed, bypassing the service.
    fn seeded_store(versions: std::ops::RangeInclusive<u64>) -> Box<dyn LogStore> {
        let mut store = InMemoryLogStore::new();
        for version in versions {
            let encoded = serde_json::to_string(&payload(version, "set").op).unwrap();
            store.prepare(version, &encoded).unwrap();
            store.commit().unwrap();
        }
        Box::new(store)
    }

    fn commit_log_with(service: Arc<RecordingService>, store: Box<dyn LogStore>) -> Arc<CommitLog> {
        Arc::new(CommitLog::new(test_logger(), service, true, store))
    }

    async fn start_doer(
        commit_log: Arc<CommitLog>,
        peer: Option<Arc<dyn PeerLog>>,
    ) -> Result<Arc<Doer>, LogError> {
        Doer::start(
            test_logger(),
            commit_log,
            peer,
            3,
            Duration::from_millis(25),
        )
        .await
    }

    #[tokio::test]
    async fn solo_submit_assigns_next_version_and_applies_once() {
        let service = Arc::new(RecordingService::default());
        let commit_log = commit_log_with(service.clone(), Box::new(InMemoryLogStore::new()));
        let doer = start_doer(commit_log.clone(), None).await.unwrap();

        doer.submit(payload(0, "set"), true).await.unwrap();

        assert_eq!(commit_log.committed().unwrap().version, 1);
        assert_eq!(*service.applied.lock().unwrap(), vec![1]);

        doer.submit(payload(0, "set"), true).await.unwrap();
        assert_eq!(commit_log.committed().unwrap().version, 2);
        assert_eq!(*service.applied.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_and_leaves_log_untouched() {
        let service = Arc::new(RecordingService::default());
        let commit_log = commit_log_with(service.clone(), seeded_store(1..=3));
        let doer = start_doer(commit_log.clone(), None).await.unwrap();

        let result = doer.submit(payload(5, "set"), false).await;

        assert!(matches!(result, Err(LogError::BadRequest(_))));
        assert_eq!(commit_log.committed().unwrap().version, 3);
        assert!(matches!(commit_log.prepared(), Err(LogError::NotFound)));
    }

    #[tokio::test]
    async fn refused_resources_leave_no_prepared_record() {
        let service = Arc::new(RecordingService::default());
        service.refuse_locks.store(true, Ordering::SeqCst);
        let commit_log = commit_log_with(service.clone(), Box::new(InMemoryLogStore::new()));
        let doer = start_doer(commit_log.clone(), None).await.unwrap();

        let result = doer.submit(payload(0, "set"), true).await;

        assert!(matches!(result, Err(LogError::ResourceBusy)));
        assert!(matches!(commit_log.prepared(), Err(LogError::NotFound)));
        assert!(matches!(commit_log.committed(), Err(LogError::NotFound)));
    }

    #[tokio::test]
    async fn startup_pushes_missing_records_to_peer() {
        let service = Arc::new(RecordingService::default());
        let commit_log = commit_log_with(service.clone(), seeded_store(1..=5));
        let peer = Arc::new(ScriptedPeer::default());
        peer.seed_committed(1..=2);

        let doer = start_doer(commit_log, Some(peer.clone())).await.unwrap();

        assert_eq!(peer.committed_version(), 5);
        assert!(doer.state.lock().await.peer_in_sync);
        // Reconciliation pushed to the peer; nothing was applied locally.
        assert!(service.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn startup_pulls_from_ahead_peer_and_applies_in_order() {
        let service = Arc::new(RecordingService::default());
        let commit_log = commit_log_with(service.clone(), seeded_store(1..=2));
        let peer = Arc::new(ScriptedPeer::default());
        peer.seed_committed(1..=5);

        let doer = start_doer(commit_log.clone(), Some(peer.clone())).await.unwrap();

        assert_eq!(commit_log.committed().unwrap().version, 5);
        assert_eq!(*service.applied.lock().unwrap(), vec![3, 4, 5]);
        assert!(doer.state.lock().await.peer_in_sync);
    }

    #[tokio::test]
    async fn startup_rolls_back_stragglers_on_both_sides() {
        let service = Arc::new(RecordingService::default());
        let mut store = InMemoryLogStore::new();
        for version in 1..=2u64 {
            let encoded = serde_json::to_string(&payload(version, "set").op).unwrap();
            store.prepare(version, &encoded).unwrap();
            store.commit().unwrap();
        }
        // A local write that never completed.
        store.prepare(3, r#"{"method":"set","data":{}}"#).unwrap();
        let commit_log = commit_log_with(service.clone(), Box::new(store));

        let peer = Arc::new(ScriptedPeer::default());
        peer.seed_committed(1..=2);
        peer.log.lock().unwrap().prepared = Some(payload(3, "set"));

        let doer = start_doer(commit_log.clone(), Some(peer.clone())).await.unwrap();

        assert_eq!(commit_log.committed().unwrap().version, 2);
        assert!(matches!(commit_log.prepared(), Err(LogError::NotFound)));
        assert_eq!(peer.prepared_version(), None);
        assert!(doer.state.lock().await.peer_in_sync);
        assert!(service.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn startup_rolls_forward_orphaned_prepare_without_peer() {
        let service = Arc::new(RecordingService::default());
        let mut store = InMemoryLogStore::new();
        let encoded = serde_json::to_string(&payload(1, "set").op).unwrap();
        store.prepare(1, &encoded).unwrap();
        let commit_log = commit_log_with(service.clone(), Box::new(store));

        let _doer = start_doer(commit_log.clone(), None).await.unwrap();

        assert_eq!(commit_log.committed().unwrap().version, 1);
        assert_eq!(*service.applied.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn unreachable_peer_defers_reconciliation() {
        let service = Arc::new(RecordingService::default());
        let commit_log = commit_log_with(service, seeded_store(1..=2));
        let peer = Arc::new(ScriptedPeer::default());
        peer.seed_committed(1..=1);
        peer.fail_prepare.store(true, Ordering::SeqCst);

        let doer = start_doer(commit_log, Some(peer.clone())).await.unwrap();

        assert!(!doer.state.lock().await.peer_in_sync);
        assert_eq!(peer.committed_version(), 1);
    }

    #[tokio::test]
    async fn peer_failure_mid_write_marks_out_of_sync() {
        let service = Arc::new(RecordingService::default());
        let commit_log = commit_log_with(service, Box::new(InMemoryLogStore::new()));
        let peer = Arc::new(ScriptedPeer::default());
        // Long sync interval: the catch-up task stays quiet so the call
        // counts below are exactly the submit path's.
        let doer = Doer::start(
            test_logger(),
            commit_log.clone(),
            Some(peer.clone() as Arc<dyn PeerLog>),
            3,
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        peer.fail_prepare.store(true, Ordering::SeqCst);

        // The client still sees success; the peer is marked out of sync
        // after the retries are exhausted.
        doer.submit(payload(0, "set"), true).await.unwrap();
        assert_eq!(commit_log.committed().unwrap().version, 1);
        assert_eq!(peer.prepare_calls.load(Ordering::SeqCst), 3);
        assert!(!doer.state.lock().await.peer_in_sync);

        // Further writes skip the peer entirely.
        doer.submit(payload(0, "set"), true).await.unwrap();
        assert_eq!(commit_log.committed().unwrap().version, 2);
        assert_eq!(peer.prepare_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn peer_commit_failure_leaves_local_commit_standing() {
        let service = Arc::new(RecordingService::default());
        let commit_log = commit_log_with(service, Box::new(InMemoryLogStore::new()));
        let peer = Arc::new(ScriptedPeer::default());
        let doer = Doer::start(
            test_logger(),
            commit_log.clone(),
            Some(peer.clone() as Arc<dyn PeerLog>),
            3,
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        peer.fail_commit.store(true, Ordering::SeqCst);

        doer.submit(payload(0, "set"), true).await.unwrap();

        // The local commit stands; the peer kept its prepared record and
        // was marked out of sync for the catch-up task to repair.
        assert_eq!(commit_log.committed().unwrap().version, 1);
        assert_eq!(peer.committed_version(), 0);
        assert_eq!(peer.prepared_version(), Some(1));
        assert!(!doer.state.lock().await.peer_in_sync);
    }

    #[tokio::test]
    async fn catch_up_task_reconverges_recovered_peer() {
        let service = Arc::new(RecordingService::default());
        let commit_log = commit_log_with(service, Box::new(InMemoryLogStore::new()));
        let peer = Arc::new(ScriptedPeer::default());
        let doer = start_doer(commit_log.clone(), Some(peer.clone()))
            .await
            .unwrap();

        peer.fail_prepare.store(true, Ordering::SeqCst);
        doer.submit(payload(0, "set"), true).await.unwrap();
        assert!(!doer.state.lock().await.peer_in_sync);

        peer.fail_prepare.store(false, Ordering::SeqCst);
        let mut caught_up = false;
        for _ in 0..200 {
            if peer.committed_version() == 1 && doer.state.lock().await.peer_in_sync {
                caught_up = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(caught_up, "peer never caught up");
    }

    #[tokio::test]
    async fn in_sync_peer_receives_writes_in_order() {
        let service = Arc::new(RecordingService::default());
        let commit_log = commit_log_with(service, Box::new(InMemoryLogStore::new()));
        let peer = Arc::new(ScriptedPeer::default());
        let doer = start_doer(commit_log, Some(peer.clone())).await.unwrap();

        for _ in 0..3 {
            doer.submit(payload(0, "set"), true).await.unwrap();
        }

        assert_eq!(peer.committed_version(), 3);
        assert_eq!(peer.prepare_calls.load(Ordering::SeqCst), 3);
        assert!(doer.state.lock().await.peer_in_sync);
    }
}
