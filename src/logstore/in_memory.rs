use crate::logstore::{LogStore, StoreError};
use std::collections::BTreeMap;

/// In-memory LogStore with the same semantics as the durable store, for
/// tests and wiring checks.
#[derive(Default)]
pub struct InMemoryLogStore {
    records: BTreeMap<u64, String>,
    committed: u64,
    prepared: Option<u64>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for InMemoryLogStore {
    fn prepared(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.prepared)
    }

    fn committed(&self) -> Result<u64, StoreError> {
        Ok(self.committed)
    }

    fn prepare(&mut self, version: u64, data: &str) -> Result<(), StoreError> {
        if self.prepared.is_some() {
            return Err(StoreError::AlreadyPrepared);
        }
        if version != self.committed + 1 {
            return Err(StoreError::VersionGap {
                attempted: version,
                committed: self.committed,
            });
        }
        self.records.insert(version, data.to_string());
        self.prepared = Some(version);
        Ok(())
    }

    fn commit(&mut self) -> Result<Option<u64>, StoreError> {
        let version = match self.prepared.take() {
            Some(v) => v,
            None => return Ok(None),
        };
        self.committed = version;
        Ok(Some(version))
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(version) = self.prepared.take() {
            self.records.remove(&version);
        }
        Ok(())
    }

    fn get(&self, version: u64) -> Result<String, StoreError> {
        self.records
            .get(&version)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn compact(&mut self, keep: u64) -> Result<(), StoreError> {
        let horizon = self.committed.saturating_sub(keep);
        self.records = self.records.split_off(&(horizon + 1));
        Ok(())
    }
}
