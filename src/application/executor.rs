use crate::application::codec::{IdempotentPayload, JsonResultCodec};
use crate::domain::ports::{
    AcquireCommand, AcquireState, Clock, DistributedLock, IdempotencyMetrics, IdempotencyStore,
    MarkFailedCommand, MarkSuccessCommand, NoopMetrics,
};
use crate::domain::record::{IdemStatus, IdempotencyRecord};
use crate::domain::request::IdempotencyRequest;
use crate::error::{ExecuteError, IdempotencyError};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::in_memory::NoopLock;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Outcome of a guarded execution. Callers branch on data, not on error
/// hierarchies; "in progress" is an ordinary value, not an exception.
#[derive(Debug)]
pub enum Execution<T> {
    /// The operation ran in this call and produced this value.
    Fresh(T),
    /// A previous execution's stored result was returned without re-running
    /// the operation.
    Replayed(T),
    /// Another execution currently owns the key and the caller did not (or
    /// could not, within `wait_max`) wait it out.
    InProgress,
}

impl<T> Execution<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Fresh(v) | Self::Replayed(v) => Some(v),
            Self::InProgress => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Fresh(v) | Self::Replayed(v) => Some(v),
            Self::InProgress => None,
        }
    }

    pub fn is_replayed(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress)
    }
}

/// Tuning knobs for the executor. Both bounds are deliberate: the poll
/// interval paces the wait loop, the retry budget keeps `Retryable` races
/// from looping forever under pathological contention.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub poll_interval: Duration,
    pub acquire_retry_budget: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            acquire_retry_budget: 3,
        }
    }
}

/// Orchestrates a guarded request: attempts the advisory lock, consults the
/// store, runs the caller's operation at most once, and persists the outcome.
///
/// The store's atomic acquire is the sole serialization point; the lock is a
/// fast path only. Dropping the returned future (tokio cancellation) aborts
/// the wait loop.
pub struct IdempotentExecutor {
    store: Arc<dyn IdempotencyStore>,
    lock: Arc<dyn DistributedLock>,
    metrics: Arc<dyn IdempotencyMetrics>,
    clock: Arc<dyn Clock>,
    codec: JsonResultCodec,
    config: ExecutorConfig,
}

impl IdempotentExecutor {
    /// Creates an executor over the given store with no-op lock and metrics,
    /// the system clock, and default codec and config.
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            lock: Arc::new(NoopLock),
            metrics: Arc::new(NoopMetrics),
            clock: Arc::new(SystemClock),
            codec: JsonResultCodec::default(),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn IdempotencyMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_codec(mut self, codec: JsonResultCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Executes `operation` at most once for the request's identity triple.
    ///
    /// Returns the fresh or replayed result, or [`Execution::InProgress`]
    /// when another execution owns the key and the caller is not waiting it
    /// out. Business failures from `operation` are recorded best-effort and
    /// re-raised verbatim as [`ExecuteError::Operation`].
    pub async fn execute<T, E, F, Fut>(
        &self,
        request: &IdempotencyRequest,
        operation: F,
    ) -> Result<Execution<T>, ExecuteError<E>>
    where
        T: IdempotentPayload,
        E: std::error::Error,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let lock_key = request.lock_key();
        let locked = self
            .lock
            .try_lock(&lock_key, request.lock_ttl)
            .await
            .unwrap_or(false);

        let result = self.execute_inner(request, operation, locked).await;

        // Guaranteed-cleanup equivalent: release on every path. A failed
        // unlock only delays other callers until the lock TTL lapses.
        if locked && let Err(err) = self.lock.unlock(&lock_key).await {
            warn!(%lock_key, %err, "advisory unlock failed");
        }

        result
    }

    async fn execute_inner<T, E, F, Fut>(
        &self,
        request: &IdempotencyRequest,
        operation: F,
        locked: bool,
    ) -> Result<Execution<T>, ExecuteError<E>>
    where
        T: IdempotentPayload,
        E: std::error::Error,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let now = self.clock.now();
        let expire_at = now + request.ttl;
        let lock_until = now + request.lock_ttl;

        if !locked {
            // Lock contention: consult the store before fighting over the
            // atomic acquire. Falls through when the record is absent or its
            // lease/expiry has lapsed.
            let existing = self
                .store
                .find(request.tenant_id, &request.biz_type, &request.idem_key)
                .await?;
            if let Some(record) = existing {
                if record.request_hash != request.request_hash {
                    self.metrics.record_conflict();
                    return Err(self.conflict(request).into());
                }
                if record.status == IdemStatus::Succeeded && record.expire_at > now {
                    self.metrics.record_replay();
                    debug!(idem_key = %request.idem_key, "replaying stored result");
                    return Ok(Execution::Replayed(self.codec.decode(&record)?));
                }
                if record.status == IdemStatus::Processing && record.lock_until > now {
                    self.metrics.record_in_progress();
                    if !request.wait_for_completion {
                        return Ok(Execution::InProgress);
                    }
                    return self.wait_for_completion(request, now).await;
                }
            }
        }

        let command = AcquireCommand {
            tenant_id: request.tenant_id,
            biz_type: request.biz_type.clone(),
            idem_key: request.idem_key.clone(),
            request_hash: request.request_hash.clone(),
            expire_at,
            lock_until,
        };

        let mut attempts = 0;
        let outcome = loop {
            let outcome = self.store.try_acquire(command.clone()).await?;
            self.metrics.record_acquire(outcome.state);
            if outcome.state != AcquireState::Retryable {
                break outcome;
            }
            attempts += 1;
            self.metrics.record_retry();
            if attempts > self.config.acquire_retry_budget {
                return Err(IdempotencyError::Storage(format!(
                    "acquire retry budget exhausted after {attempts} attempts for {}",
                    request.lock_key()
                ))
                .into());
            }
            debug!(idem_key = %request.idem_key, attempts, "retrying acquire after benign race");
        };

        match outcome.state {
            AcquireState::Acquired => self.run_operation(request, operation, expire_at).await,
            AcquireState::ReplaySucceeded => {
                self.metrics.record_replay();
                let record = outcome.record.ok_or_else(|| {
                    IdempotencyError::Storage("replay outcome carried no record".to_string())
                })?;
                debug!(idem_key = %request.idem_key, "replaying stored result");
                Ok(Execution::Replayed(self.codec.decode(&record)?))
            }
            AcquireState::Conflict => {
                self.metrics.record_conflict();
                Err(self.conflict(request).into())
            }
            AcquireState::InProgress => {
                self.metrics.record_in_progress();
                if !request.wait_for_completion {
                    return Ok(Execution::InProgress);
                }
                self.wait_for_completion(request, now).await
            }
            AcquireState::Retryable => unreachable!("retryable handled by the acquire loop"),
        }
    }

    async fn run_operation<T, E, F, Fut>(
        &self,
        request: &IdempotencyRequest,
        operation: F,
        expire_at: SystemTime,
    ) -> Result<Execution<T>, ExecuteError<E>>
    where
        T: IdempotentPayload,
        E: std::error::Error,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match operation().await {
            Ok(value) => {
                let encoded = self.codec.encode(&value);
                self.store
                    .mark_success(MarkSuccessCommand {
                        tenant_id: request.tenant_id,
                        biz_type: request.biz_type.clone(),
                        idem_key: request.idem_key.clone(),
                        request_hash: request.request_hash.clone(),
                        result_ref: encoded.result_ref,
                        result_json: encoded.result_json,
                        expire_at,
                    })
                    .await?;
                Ok(Execution::Fresh(value))
            }
            Err(err) => {
                // Best-effort: the business error always wins over a failure
                // to record it.
                let mark = self
                    .store
                    .mark_failed(MarkFailedCommand {
                        tenant_id: request.tenant_id,
                        biz_type: request.biz_type.clone(),
                        idem_key: request.idem_key.clone(),
                        request_hash: request.request_hash.clone(),
                        error_code: None,
                        error_msg: Some(err.to_string()),
                        expire_at,
                    })
                    .await;
                if let Err(store_err) = mark {
                    warn!(idem_key = %request.idem_key, %store_err, "failed to record business failure");
                }
                Err(ExecuteError::Operation(err))
            }
        }
    }

    /// Bounded poll loop for callers that opted into synchronous semantics.
    ///
    /// Polling is the simple baseline here; both the interval and `wait_max`
    /// are configurable and bounded. Cancellation propagates because the
    /// future simply stops being polled once dropped.
    async fn wait_for_completion<T, E>(
        &self,
        request: &IdempotencyRequest,
        start: SystemTime,
    ) -> Result<Execution<T>, ExecuteError<E>>
    where
        T: IdempotentPayload,
        E: std::error::Error,
    {
        let Some(wait_max) = request.wait_max else {
            return Ok(Execution::InProgress);
        };
        if wait_max.is_zero() {
            return Ok(Execution::InProgress);
        }

        let deadline = start + wait_max;
        while self.clock.now() < deadline {
            let record = self
                .store
                .find(request.tenant_id, &request.biz_type, &request.idem_key)
                .await?;
            if let Some(record) = record {
                if record.request_hash != request.request_hash {
                    self.metrics.record_conflict();
                    return Err(self.conflict(request).into());
                }
                match record.status {
                    IdemStatus::Succeeded => {
                        self.metrics.record_replay();
                        return Ok(Execution::Replayed(self.codec.decode(&record)?));
                    }
                    IdemStatus::Failed => {
                        return Err(self.upstream_failed(request, &record).into());
                    }
                    IdemStatus::Processing => {}
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Ok(Execution::InProgress)
    }

    fn conflict(&self, request: &IdempotencyRequest) -> IdempotencyError {
        IdempotencyError::Conflict {
            tenant_id: request.tenant_id,
            biz_type: request.biz_type.clone(),
            idem_key: request.idem_key.clone(),
        }
    }

    fn upstream_failed(
        &self,
        request: &IdempotencyRequest,
        record: &IdempotencyRecord,
    ) -> IdempotencyError {
        IdempotencyError::UpstreamFailed {
            tenant_id: request.tenant_id,
            biz_type: request.biz_type.clone(),
            idem_key: request.idem_key.clone(),
            error_msg: record.error_msg.clone(),
        }
    }
}
