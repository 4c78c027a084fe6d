use super::record::IdempotencyRecord;
use crate::error::Result;
use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// Outcome state of [`IdempotencyStore::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquireState {
    /// This call now owns execution.
    Acquired,
    /// Another execution already completed successfully inside its replay
    /// window; the stored result should be returned.
    ReplaySucceeded,
    /// The stored record carries a different request hash.
    Conflict,
    /// Another execution holds an unexpired lease (or the record is failed
    /// and still claimed under [`FailedRecordPolicy::HoldUntilExpiry`]).
    InProgress,
    /// A benign race (record vanished or a conditional update lost); the
    /// caller may retry the acquire immediately, within a bounded budget.
    Retryable,
}

/// State plus the record that drove the decision, when one existed.
#[derive(Debug, Clone)]
pub struct AcquireOutcome {
    pub state: AcquireState,
    pub record: Option<IdempotencyRecord>,
}

impl AcquireOutcome {
    pub fn new(state: AcquireState, record: Option<IdempotencyRecord>) -> Self {
        Self { state, record }
    }
}

/// How `try_acquire` treats a `Failed` record that has not yet expired.
///
/// The original system always held the slot until expiry, which rate-limits
/// retries against a failing downstream but also forces callers to wait out
/// the full TTL for a failure they already know about. Tunable per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailedRecordPolicy {
    /// Failed-but-unexpired records stay claimed; acquirers see `InProgress`.
    #[default]
    HoldUntilExpiry,
    /// A same-hash acquirer may reset a failed record to `Processing` at once.
    ReacquireImmediately,
}

#[derive(Debug, Clone)]
pub struct AcquireCommand {
    pub tenant_id: i64,
    pub biz_type: String,
    pub idem_key: String,
    pub request_hash: String,
    pub expire_at: SystemTime,
    pub lock_until: SystemTime,
}

#[derive(Debug, Clone)]
pub struct MarkSuccessCommand {
    pub tenant_id: i64,
    pub biz_type: String,
    pub idem_key: String,
    pub request_hash: String,
    pub result_ref: Option<String>,
    pub result_json: Option<String>,
    pub expire_at: SystemTime,
}

#[derive(Debug, Clone)]
pub struct MarkFailedCommand {
    pub tenant_id: i64,
    pub biz_type: String,
    pub idem_key: String,
    pub request_hash: String,
    pub error_code: Option<String>,
    pub error_msg: Option<String>,
    pub expire_at: SystemTime,
}

/// Persistent state machine over idempotency records; the single source of
/// truth for at-most-once execution.
///
/// Every operation must be atomic with respect to the identity triple.
/// `try_acquire` is conceptually an insert with a uniqueness constraint whose
/// conflict handling runs inside the same atomic boundary; the application
/// layer never does read-then-write against these records.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Attempt to insert a fresh `Processing` record, or decide the outcome
    /// against the existing one. Decision order on an existing record:
    ///
    /// 1. `expire_at` passed (any status, any hash) => conditional reset with
    ///    the new hash and lease => `Acquired`; lost race => `Retryable`.
    /// 2. request hash differs => `Conflict`.
    /// 3. `Succeeded` and unexpired => `ReplaySucceeded`.
    /// 4. `Processing` with a live lease => `InProgress`; lease expired =>
    ///    conditional reclaim guarded by `lock_until <= now` => `Acquired`,
    ///    lost race => `InProgress`.
    /// 5. `Failed` and unexpired => per [`FailedRecordPolicy`].
    async fn try_acquire(&self, cmd: AcquireCommand) -> Result<AcquireOutcome>;

    /// Record a successful result. Conditional on the stored request hash
    /// still matching; a silent no-op otherwise (the caller lost its lease to
    /// a reclaimer and must not corrupt the new owner's record).
    async fn mark_success(&self, cmd: MarkSuccessCommand) -> Result<()>;

    /// Record a failure. Same conditional-on-hash semantics as `mark_success`.
    async fn mark_failed(&self, cmd: MarkFailedCommand) -> Result<()>;

    async fn find(
        &self,
        tenant_id: i64,
        biz_type: &str,
        idem_key: &str,
    ) -> Result<Option<IdempotencyRecord>>;
}

/// Best-effort, short-lived mutual exclusion keyed by string.
///
/// Purely advisory: it reduces duplicate execution attempts and store load on
/// hot keys, never provides the correctness guarantee. A no-op implementation
/// must preserve correctness.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool>;
    async fn unlock(&self, key: &str) -> Result<()>;
}

/// Time source, injectable for testability.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Counters for engine outcomes. All methods default to no-ops so that any
/// implementation is substitutable with no behavior change.
pub trait IdempotencyMetrics: Send + Sync {
    fn record_acquire(&self, _state: AcquireState) {}
    fn record_replay(&self) {}
    fn record_conflict(&self) {}
    fn record_in_progress(&self) {}
    fn record_retry(&self) {}
}

/// Metrics sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl IdempotencyMetrics for NoopMetrics {}
