use crate::domain::ports::{
    AcquireCommand, AcquireOutcome, AcquireState, Clock, DistributedLock, FailedRecordPolicy,
    IdempotencyStore, MarkFailedCommand, MarkSuccessCommand,
};
use crate::domain::record::{IdemStatus, IdempotencyRecord};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::clock::SystemClock;

type IdentityKey = (i64, String, String);

/// Thread-safe in-memory idempotency store.
///
/// The whole `try_acquire` decision table runs under one write guard, which
/// makes it atomic within the process. Reference implementation for tests
/// and single-node deployments; multi-node setups need a store whose
/// conditional updates are atomic at the storage engine.
#[derive(Clone)]
pub struct InMemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<IdentityKey, IdempotencyRecord>>>,
    clock: Arc<dyn Clock>,
    failed_policy: FailedRecordPolicy,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryIdempotencyStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            clock,
            failed_policy: FailedRecordPolicy::default(),
        }
    }

    pub fn with_failed_policy(mut self, policy: FailedRecordPolicy) -> Self {
        self.failed_policy = policy;
        self
    }

    fn key(tenant_id: i64, biz_type: &str, idem_key: &str) -> IdentityKey {
        (tenant_id, biz_type.to_string(), idem_key.to_string())
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

    /// Reset an existing record to `Processing` for a new acquirer, keeping
    /// its creation time and bumping the version.
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
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn try_acquire(&self, cmd: AcquireCommand) -> Result<AcquireOutcome> {
        let mut records = self.records.write().await;
        let now = self.clock.now();
        let key = Self::key(cmd.tenant_id, &cmd.biz_type, &cmd.idem_key);

        let existing = match records.entry(key) {
            Entry::Vacant(entry) => {
                let created = Self::fresh_record(&cmd, now);
                entry.insert(created.clone());
                return Ok(AcquireOutcome::new(AcquireState::Acquired, Some(created)));
            }
            Entry::Occupied(entry) => entry.into_mut(),
        };

        // Expiry reopens the slot regardless of status or hash.
        if existing.expire_at <= now {
            debug!(idem_key = %cmd.idem_key, "resetting expired record");
            Self::reset_record(existing, &cmd, now);
            return Ok(AcquireOutcome::new(
                AcquireState::Acquired,
                Some(existing.clone()),
            ));
        }

        if existing.request_hash != cmd.request_hash {
            return Ok(AcquireOutcome::new(
                AcquireState::Conflict,
                Some(existing.clone()),
            ));
        }

        match existing.status {
            IdemStatus::Succeeded => Ok(AcquireOutcome::new(
                AcquireState::ReplaySucceeded,
                Some(existing.clone()),
            )),
            IdemStatus::Processing => {
                if existing.lock_until > now {
                    return Ok(AcquireOutcome::new(
                        AcquireState::InProgress,
                        Some(existing.clone()),
                    ));
                }
                // Lease lapsed without a terminal status: reclaim.
                debug!(idem_key = %cmd.idem_key, "reclaiming expired lease");
                Self::reset_record(existing, &cmd, now);
                Ok(AcquireOutcome::new(
                    AcquireState::Acquired,
                    Some(existing.clone()),
                ))
            }
            IdemStatus::Failed => match self.failed_policy {
                // Failed but unexpired stays claimed: a fresh attempt waits
                // out the expiry instead of thrashing a failing dependency.
                FailedRecordPolicy::HoldUntilExpiry => Ok(AcquireOutcome::new(
                    AcquireState::InProgress,
                    Some(existing.clone()),
                )),
                FailedRecordPolicy::ReacquireImmediately => {
                    Self::reset_record(existing, &cmd, now);
                    Ok(AcquireOutcome::new(
                        AcquireState::Acquired,
                        Some(existing.clone()),
                    ))
                }
            },
        }
    }

    async fn mark_success(&self, cmd: MarkSuccessCommand) -> Result<()> {
        let mut records = self.records.write().await;
        let now = self.clock.now();
        let key = Self::key(cmd.tenant_id, &cmd.biz_type, &cmd.idem_key);
        // Conditional on hash: a reclaimed record belongs to a new owner and
        // a lost race must not corrupt it.
        if let Some(record) = records.get_mut(&key)
            && record.request_hash == cmd.request_hash
        {
            record.status = IdemStatus::Succeeded;
            record.result_ref = cmd.result_ref;
            record.result_json = cmd.result_json;
            record.expire_at = cmd.expire_at;
            record.version += 1;
            record.updated_at = now;
        }
        Ok(())
    }

    async fn mark_failed(&self, cmd: MarkFailedCommand) -> Result<()> {
        let mut records = self.records.write().await;
        let now = self.clock.now();
        let key = Self::key(cmd.tenant_id, &cmd.biz_type, &cmd.idem_key);
        if let Some(record) = records.get_mut(&key)
            && record.request_hash == cmd.request_hash
        {
            record.status = IdemStatus::Failed;
            record.error_code = cmd.error_code;
            record.error_msg = cmd.error_msg;
            record.expire_at = cmd.expire_at;
            record.version += 1;
            record.updated_at = now;
        }
        Ok(())
    }

    async fn find(
        &self,
        tenant_id: i64,
        biz_type: &str,
        idem_key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&Self::key(tenant_id, biz_type, idem_key))
            .cloned())
    }
}

/// Advisory lock that grants every request. Correctness never depends on the
/// lock, so this is the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLock;

#[async_trait]
impl DistributedLock for NoopLock {
    async fn try_lock(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        Ok(true)
    }

    async fn unlock(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// In-process TTL lock for tests and the demo binary. Mimics the contention
/// behavior of a real distributed lock on a single node.
#[derive(Clone)]
pub struct InMemoryLock {
    held: Arc<Mutex<HashMap<String, SystemTime>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryLock {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryLock {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut held = self.held.lock().await;
        let now = self.clock.now();
        if let Some(expiry) = held.get(key)
            && *expiry > now
        {
            return Ok(false);
        }
        held.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn unlock(&self, key: &str) -> Result<()> {
        let mut held = self.held.lock().await;
        held.remove(key);
        Ok(())
    }
}
