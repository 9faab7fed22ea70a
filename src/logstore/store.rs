/// LogStore is an ordered store of numbered records with a single in-flight
/// prepared record and a committed high-water mark. Records are dense from
/// version 1 upward, except where compaction has truncated the low end.
pub trait LogStore: Send {
    /// Version of the outstanding prepared record, if any.
    fn prepared(&self) -> Result<Option<u64>, StoreError>;

    /// Highest committed version. 0 means nothing has been committed.
    fn committed(&self) -> Result<u64, StoreError>;

    /// Write `data` as the prepared record at `version`. `version` must be
    /// exactly one past the committed version, and no record may currently
    /// be prepared.
    fn prepare(&mut self, version: u64, data: &str) -> Result<(), StoreError>;

    /// Promote the prepared record to committed and return its version.
    /// A no-op returning `None` when nothing is prepared.
    fn commit(&mut self) -> Result<Option<u64>, StoreError>;

    /// Discard the prepared record and its data. A no-op when nothing is
    /// prepared.
    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Fetch the record stored at `version`.
    fn get(&self, version: u64) -> Result<String, StoreError>;

    /// Delete records with `version <= committed - keep`. The prepared
    /// record is never deleted.
    fn compact(&mut self, keep: u64) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("version {attempted} does not follow committed version {committed}")]
    VersionGap { attempted: u64, committed: u64 },

    #[error("a prepared record already exists")]
    AlreadyPrepared,

    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}
