//! Idempotent execution engine: guarantees that a business operation
//! identified by a caller-supplied key executes at most once, even when
//! invoked concurrently, retried after timeouts, or replayed upstream.
//!
//! The store's atomic acquire is the correctness boundary; the distributed
//! lock is an advisory fast path only.

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use application::codec::{EncodedPayload, IdempotentPayload, JsonResultCodec};
pub use application::executor::{Execution, ExecutorConfig, IdempotentExecutor};
pub use domain::ports::{
    AcquireCommand, AcquireOutcome, AcquireState, Clock, DistributedLock, FailedRecordPolicy,
    IdempotencyMetrics, IdempotencyStore, MarkFailedCommand, MarkSuccessCommand, NoopMetrics,
};
pub use domain::record::{IdemStatus, IdempotencyRecord};
pub use domain::request::IdempotencyRequest;
pub use error::{ExecuteError, IdempotencyError, Result};
