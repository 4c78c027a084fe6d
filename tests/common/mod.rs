#![allow(dead_code)]

use idemgate::{AcquireState, IdempotencyMetrics, IdempotencyRequest, IdempotentPayload};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Result payload used across the integration tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub order_id: u64,
    pub public_id: String,
}

impl Receipt {
    pub fn new(order_id: u64) -> Self {
        Self {
            order_id,
            public_id: format!("ord_{order_id}"),
        }
    }
}

impl IdempotentPayload for Receipt {
    fn stable_ref(&self) -> Option<String> {
        Some(self.public_id.clone())
    }
}

/// Business error stand-in for failure passthrough tests.
#[derive(Debug, thiserror::Error)]
#[error("boom: {0}")]
pub struct BoomError(pub String);

/// Request with short, test-friendly windows.
pub fn request(idem_key: &str, hash: &str) -> IdempotencyRequest {
    IdempotencyRequest::new(1, "ORDER_SUBMIT", idem_key, hash)
        .ttl(Duration::from_secs(3600))
        .lock_ttl(Duration::from_secs(30))
}

/// Metrics sink that counts every callback, for asserting engine paths.
#[derive(Debug, Default)]
pub struct SpyMetrics {
    pub acquired: AtomicU64,
    pub replays: AtomicU64,
    pub conflicts: AtomicU64,
    pub in_progress: AtomicU64,
    pub retries: AtomicU64,
}

impl IdempotencyMetrics for SpyMetrics {
    fn record_acquire(&self, state: AcquireState) {
        if state == AcquireState::Acquired {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::SeqCst);
    }

    fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::SeqCst);
    }

    fn record_in_progress(&self) {
        self.in_progress.fetch_add(1, Ordering::SeqCst);
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
}
