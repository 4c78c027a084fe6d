//! Application layer: the idempotent execution orchestration.
//!
//! `IdempotentExecutor` is the primary entry point. It composes the store,
//! the advisory lock, the metrics sink, the clock, and the result codec, and
//! guarantees the guarded operation runs at most once per identity triple
//! within its replay window.

pub mod codec;
pub mod executor;
