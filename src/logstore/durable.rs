use crate::logstore::{LogStore, StoreError};
use std::path::Path;

const STATE_KEY: &[u8] = b"state";

/// Durable LogStore on a sled database.
///
/// Records live in the `records` tree keyed by big-endian version. The
/// committed/prepared pointer pair is a single 16-byte value in the `meta`
/// tree, so a pointer flip is one insert and can never be observed
/// half-updated. A prepared version of 0 encodes "none".
pub struct SledLogStore {
    db: sled::Db,
    records: sled::Tree,
    meta: sled::Tree,
}

impl SledLogStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let records = db.open_tree("records")?;
        let meta = db.open_tree("meta")?;
        Ok(SledLogStore { db, records, meta })
    }

    fn state(&self) -> Result<(u64, Option<u64>), StoreError> {
        let raw = match self.meta.get(STATE_KEY)? {
            Some(raw) => raw,
            None => return Ok((0, None)),
        };
        if raw.len() != 16 {
            return Err(StoreError::Corrupt(format!(
                "pointer state is {} bytes, expected 16",
                raw.len()
            )));
        }
        let mut committed = [0u8; 8];
        let mut prepared = [0u8; 8];
        committed.copy_from_slice(&raw[..8]);
        prepared.copy_from_slice(&raw[8..]);
        let prepared = match u64::from_be_bytes(prepared) {
            0 => None,
            v => Some(v),
        };
        Ok((u64::from_be_bytes(committed), prepared))
    }

    fn write_state(&self, committed: u64, prepared: Option<u64>) -> Result<(), StoreError> {
        let mut raw = [0u8; 16];
        raw[..8].copy_from_slice(&committed.to_be_bytes());
        raw[8..].copy_from_slice(&prepared.unwrap_or(0).to_be_bytes());
        self.meta.insert(STATE_KEY, &raw[..])?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl LogStore for SledLogStore {
    fn prepared(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.state()?.1)
    }

    fn committed(&self) -> Result<u64, StoreError> {
        Ok(self.state()?.0)
    }

    fn prepare(&mut self, version: u64, data: &str) -> Result<(), StoreError> {
        let (committed, prepared) = self.state()?;
        if prepared.is_some() {
            return Err(StoreError::AlreadyPrepared);
        }
        if version != committed + 1 {
            return Err(StoreError::VersionGap {
                attempted: version,
                committed,
            });
        }
        // Record first, pointer second: a crash in between leaves an orphan
        // record that the next prepare of the same version overwrites.
        self.records.insert(version.to_be_bytes(), data)?;
        self.write_state(committed, Some(version))?;
        self.flush()
    }

    fn commit(&mut self) -> Result<Option<u64>, StoreError> {
        let (_, prepared) = self.state()?;
        let version = match prepared {
            Some(v) => v,
            None => return Ok(None),
        };
        self.write_state(version, None)?;
        self.flush()?;
        Ok(Some(version))
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let (committed, prepared) = self.state()?;
        let version = match prepared {
            Some(v) => v,
            None => return Ok(()),
        };
        // Pointer first: a crash after the pointer flip leaves an orphan
        // record, never a prepared pointer to a missing record.
        self.write_state(committed, None)?;
        self.records.remove(version.to_be_bytes())?;
        self.flush()
    }

    fn get(&self, version: u64) -> Result<String, StoreError> {
        let raw = self
            .records
            .get(version.to_be_bytes())?
            .ok_or(StoreError::NotFound)?;
        String::from_utf8(raw.to_vec()).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn compact(&mut self, keep: u64) -> Result<(), StoreError> {
        let (committed, _) = self.state()?;
        let horizon = committed.saturating_sub(keep);
        let mut stale = Vec::new();
        for entry in self.records.range(..=horizon.to_be_bytes()) {
            let (key, _) = entry?;
            stale.push(key);
        }
        for key in stale {
            self.records.remove(key)?;
        }
        self.flush()
    }
}
