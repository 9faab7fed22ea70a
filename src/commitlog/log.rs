use crate::api::{LogPayload, Operation, Service};
use crate::commitlog::LogError;
use crate::logstore::LogStore;
use std::sync::{Arc, Mutex, MutexGuard};

/// CommitLog adapts the raw record store into a log of operations:
/// it serializes all access behind one mutex, checks version sanity on
/// prepare, frames operations as JSON, and applies committed operations
/// to the service.
///
/// The mutex is held across the whole body of every public method,
/// including the `Service::apply` call inside `commit`.
pub struct CommitLog {
    logger: slog::Logger,
    service: Arc<dyn Service>,
    apply_commits: bool,
    store: Mutex<Box<dyn LogStore>>,
}

impl CommitLog {
    pub fn new(
        logger: slog::Logger,
        service: Arc<dyn Service>,
        apply_commits: bool,
        store: Box<dyn LogStore>,
    ) -> Self {
        CommitLog {
            logger,
            service,
            apply_commits,
            store: Mutex::new(store),
        }
    }

    /// The outstanding prepared record, decoded.
    pub fn prepared(&self) -> Result<LogPayload, LogError> {
        let store = self.lock_store();
        let version = store
            .prepared()
            .map_err(LogError::internal)?
            .ok_or(LogError::NotFound)?;
        let data = store.get(version).map_err(LogError::internal)?;
        Ok(LogPayload {
            version,
            op: decode_op(&data)?,
        })
    }

    /// The highest committed record, decoded. `NotFound` when nothing has
    /// been committed yet.
    pub fn committed(&self) -> Result<LogPayload, LogError> {
        let store = self.lock_store();
        let version = store.committed().map_err(LogError::internal)?;
        if version == 0 {
            return Err(LogError::NotFound);
        }
        let data = store.get(version).map_err(LogError::internal)?;
        Ok(LogPayload {
            version,
            op: decode_op(&data)?,
        })
    }

    /// Validate and write `payload` as the prepared record. The payload's
    /// version must be exactly one past the committed version.
    pub fn prepare(&self, payload: &LogPayload) -> Result<(), LogError> {
        let mut store = self.lock_store();

        let committed = store.committed().map_err(LogError::internal)?;
        if payload.version != committed + 1 {
            return Err(LogError::BadRequest(format!(
                "preparing version {} but the next version is {}",
                payload.version,
                committed + 1
            )));
        }

        if let Err(err) = self.service.validate(&payload.op) {
            return Err(LogError::BadRequest(format!("invalid operation: {}", err)));
        }

        let data = serde_json::to_string(&payload.op).map_err(LogError::internal)?;
        store
            .prepare(payload.version, &data)
            .map_err(LogError::internal)
    }

    /// Promote the prepared record to committed, then apply it to the
    /// service. A no-op when nothing is prepared.
    ///
    /// An apply failure surfaces as `Internal`, but the record is already
    /// committed by then; the version will not be reused.
    pub fn commit(&self) -> Result<(), LogError> {
        let mut store = self.lock_store();

        let version = match store.commit().map_err(LogError::internal)? {
            Some(v) => v,
            None => return Ok(()),
        };
        if !self.apply_commits {
            return Ok(());
        }

        let data = store.get(version).map_err(LogError::internal)?;
        let op = decode_op(&data)?;
        if let Err(err) = self.service.apply(version, &op) {
            slog::error!(self.logger, "apply failed for committed record";
                "version" => version, "error" => %err);
            return Err(LogError::internal(err));
        }
        Ok(())
    }

    /// Discard any prepared record. A no-op when nothing is prepared.
    pub fn rollback(&self) -> Result<(), LogError> {
        self.lock_store().rollback().map_err(LogError::internal)
    }

    /// Fetch a historical record. Records at or below the compaction
    /// horizon are gone; asking for them is an internal error, not a
    /// queryable absence.
    pub fn record(&self, version: u64) -> Result<LogPayload, LogError> {
        let store = self.lock_store();
        let data = store.get(version).map_err(LogError::internal)?;
        Ok(LogPayload {
            version,
            op: decode_op(&data)?,
        })
    }

    pub fn lock_resources(&self, op: &Operation) -> Result<(), LogError> {
        let _store = self.lock_store();
        if !self.service.lock_resources(op) {
            return Err(LogError::ResourceBusy);
        }
        Ok(())
    }

    pub fn unlock_resources(&self, op: &Operation) {
        let _store = self.lock_store();
        self.service.unlock_resources(op);
    }

    /// Drop records older than the last `keep` committed ones.
    pub fn compact(&self, keep: u64) -> Result<(), LogError> {
        self.lock_store().compact(keep).map_err(LogError::internal)
    }

    fn lock_store(&self) -> MutexGuard<'_, Box<dyn LogStore>> {
        self.store.lock().expect("commit log store mutex poisoned")
    }
}

fn decode_op(data: &str) -> Result<Operation, LogError> {
    serde_json::from_str(data).map_err(LogError::internal)
}
