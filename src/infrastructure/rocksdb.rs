use crate::domain::ports::{
    AcquireCommand, AcquireOutcome, AcquireState, Clock, FailedRecordPolicy, IdempotencyStore,
    MarkFailedCommand, MarkSuccessCommand,
};
use crate::domain::record::{IdemStatus, IdempotencyRecord};
use crate::error::{IdempotencyError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;

use super::clock::SystemClock;

/// Column family holding one serialized record per identity triple.
pub const CF_IDEM_RECORDS: &str = "idem_records";

fn storage_err(err: impl Display) -> IdempotencyError {
    IdempotencyError::Storage(err.to_string())
}

/// Persistent idempotency store backed by RocksDB.
///
/// Records are serialized with serde_json under a `tenant|biz|key` byte key.
/// RocksDB has no conditional updates, so the decision table runs under a
/// per-store async mutex; that makes acquire/mark atomic within one process.
/// Cross-process deployments need a storage engine with its own atomic
/// compare-and-set (the SQL uniqueness-constraint shape this adapter mirrors).
#[derive(Clone)]
pub struct RocksDbIdempotencyStore {
    db: Arc<DB>,
    write_guard: Arc<Mutex<()>>,
    clock: Arc<dyn Clock>,
    failed_policy: FailedRecordPolicy,
}

impl RocksDbIdempotencyStore {
    /// Opens or creates a RocksDB instance at the given path, ensuring the
    /// records column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_records = ColumnFamilyDescriptor::new(CF_IDEM_RECORDS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_records]).map_err(storage_err)?;

        Ok(Self {
            db: Arc::new(db),
            write_guard: Arc::new(Mutex::new(())),
            clock: Arc::new(SystemClock),
            failed_policy: FailedRecordPolicy::default(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_failed_policy(mut self, policy: FailedRecordPolicy) -> Self {
        self.failed_policy = policy;
        self
    }

    fn key(tenant_id: i64, biz_type: &str, idem_key: &str) -> Vec<u8> {
        format!("{tenant_id}|{biz_type}|{idem_key}").into_bytes()
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_IDEM_RECORDS)
            .ok_or_else(|| storage_err("idem_records column family not found"))
    }

    fn load(&self, key: &[u8]) -> Result<Option<IdempotencyRecord>> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &[u8], record: &IdempotencyRecord) -> Result<()> {
        let cf = self.cf()?;
        let bytes = serde_json::to_vec(record).map_err(storage_err)?;
        self.db.put_cf(cf, key, bytes).map_err(storage_err)
    }

    fn fresh_record(cmd: &AcquireCommand, now: SystemTime) -> IdempotencyRecord {
        IdempotencyRecord {
            tenant_id: cmd.tenant_id,
            biz_type: cmd.biz_type.clone(),
            idem_key: cmd.idem_key.clone(),
            request_hash: cmd.request_hash.clone(),
            status: IdemStatus::Processing,
            result_ref: None,
            result_json: None,
            error_code: None,
            error_msg: None,
            expire_at: cmd.expire_at,
            lock_until: cmd.lock_until,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn reset_record(record: &mut IdempotencyRecord, cmd: &AcquireCommand, now: SystemTime) {
        record.request_hash = cmd.request_hash.clone();
        record.status = IdemStatus::Processing;
        record.result_ref = None;
        record.result_json = None;
        record.error_code = None;
        record.error_msg = None;
        record.expire_at = cmd.expire_at;
        record.lock_until = cmd.lock_until;
        record.version += 1;
        record.updated_at = now;
    }
}

#[async_trait]
impl IdempotencyStore for RocksDbIdempotencyStore {
    async fn try_acquire(&self, cmd: AcquireCommand) -> Result<AcquireOutcome> {
        let _guard = self.write_guard.lock().await;
        let now = self.clock.now();
        let key = Self::key(cmd.tenant_id, &cmd.biz_type, &cmd.idem_key);

        let Some(mut existing) = self.load(&key)? else {
            let created = Self::fresh_record(&cmd, now);
            self.put(&key, &created)?;
            return Ok(AcquireOutcome::new(AcquireState::Acquired, Some(created)));
        };

        if existing.expire_at <= now {
            Self::reset_record(&mut existing, &cmd, now);
            self.put(&key, &existing)?;
            return Ok(AcquireOutcome::new(AcquireState::Acquired, Some(existing)));
        }

        if existing.request_hash != cmd.request_hash {
            return Ok(AcquireOutcome::new(AcquireState::Conflict, Some(existing)));
        }

        match existing.status {
            IdemStatus::Succeeded => Ok(AcquireOutcome::new(
                AcquireState::ReplaySucceeded,
                Some(existing),
            )),
            IdemStatus::Processing => {
                if existing.lock_until > now {
                    return Ok(AcquireOutcome::new(AcquireState::InProgress, Some(existing)));
                }
                Self::reset_record(&mut existing, &cmd, now);
                self.put(&key, &existing)?;
                Ok(AcquireOutcome::new(AcquireState::Acquired, Some(existing)))
            }
            IdemStatus::Failed => match self.failed_policy {
                FailedRecordPolicy::HoldUntilExpiry => {
                    Ok(AcquireOutcome::new(AcquireState::InProgress, Some(existing)))
                }
                FailedRecordPolicy::ReacquireImmediately => {
                    Self::reset_record(&mut existing, &cmd, now);
                    self.put(&key, &existing)?;
                    Ok(AcquireOutcome::new(AcquireState::Acquired, Some(existing)))
                }
            },
        }
    }

    async fn mark_success(&self, cmd: MarkSuccessCommand) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let now = self.clock.now();
        let key = Self::key(cmd.tenant_id, &cmd.biz_type, &cmd.idem_key);
        if let Some(mut record) = self.load(&key)?
            && record.request_hash == cmd.request_hash
        {
            record.status = IdemStatus::Succeeded;
            record.result_ref = cmd.result_ref;
            record.result_json = cmd.result_json;
            record.expire_at = cmd.expire_at;
            record.version += 1;
            record.updated_at = now;
            self.put(&key, &record)?;
        }
        Ok(())
    }

    async fn mark_failed(&self, cmd: MarkFailedCommand) -> Result<()> {
        let _guard = self.write_guard.lock().await;
        let now = self.clock.now();
        let key = Self::key(cmd.tenant_id, &cmd.biz_type, &cmd.idem_key);
        if let Some(mut record) = self.load(&key)?
            && record.request_hash == cmd.request_hash
        {
            record.status = IdemStatus::Failed;
            record.error_code = cmd.error_code;
            record.error_msg = cmd.error_msg;
            record.expire_at = cmd.expire_at;
            record.version += 1;
            record.updated_at = now;
            self.put(&key, &record)?;
        }
        Ok(())
    }

    async fn find(
        &self,
        tenant_id: i64,
        biz_type: &str,
        idem_key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        self.load(&Self::key(tenant_id, biz_type, idem_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::ManualClock;
    use std::time::Duration;

    fn acquire_cmd(now: SystemTime, hash: &str) -> AcquireCommand {
        AcquireCommand {
            tenant_id: 1,
            biz_type: "ORDER_SUBMIT".into(),
            idem_key: "k-1".into(),
            request_hash: hash.into(),
            expire_at: now + Duration::from_secs(3600),
            lock_until: now + Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_acquire_and_replay_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH));
        let now = clock.now();

        {
            let store = RocksDbIdempotencyStore::open(dir.path())
                .unwrap()
                .with_clock(clock.clone());
            let outcome = store.try_acquire(acquire_cmd(now, "h1")).await.unwrap();
            assert_eq!(outcome.state, AcquireState::Acquired);
            store
                .mark_success(MarkSuccessCommand {
                    tenant_id: 1,
                    biz_type: "ORDER_SUBMIT".into(),
                    idem_key: "k-1".into(),
                    request_hash: "h1".into(),
                    result_ref: Some("ord_42".into()),
                    result_json: Some("{\"order_id\":42}".into()),
                    expire_at: now + Duration::from_secs(3600),
                })
                .await
                .unwrap();
        }

        let store = RocksDbIdempotencyStore::open(dir.path())
            .unwrap()
            .with_clock(clock.clone());
        let outcome = store.try_acquire(acquire_cmd(now, "h1")).await.unwrap();
        assert_eq!(outcome.state, AcquireState::ReplaySucceeded);
        let record = outcome.record.unwrap();
        assert_eq!(record.result_ref.as_deref(), Some("ord_42"));
    }

    #[tokio::test]
    async fn test_conflict_on_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(SystemTime::UNIX_EPOCH));
        let store = RocksDbIdempotencyStore::open(dir.path())
            .unwrap()
            .with_clock(clock.clone());
        let now = clock.now();

        store.try_acquire(acquire_cmd(now, "h1")).await.unwrap();
        let outcome = store.try_acquire(acquire_cmd(now, "h2")).await.unwrap();
        assert_eq!(outcome.state, AcquireState::Conflict);
    }
}
