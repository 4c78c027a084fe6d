use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Status of an idempotency record. Transitions move forward only; the sole
/// way back to `Processing` is an explicit lease/expiry reclaim inside the
/// store's atomic acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdemStatus {
    Processing,
    Succeeded,
    Failed,
}

/// Persisted state for one identity triple `(tenant_id, biz_type, idem_key)`.
///
/// The store guarantees at most one record per triple and performs every
/// mutation through conditional updates, so this type is a plain value with
/// no behavior of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub tenant_id: i64,
    pub biz_type: String,
    pub idem_key: String,
    /// Digest of the semantically relevant input, stored from the acquiring
    /// request. A different hash under the same triple is a conflict.
    pub request_hash: String,
    pub status: IdemStatus,
    /// Short stable reference to the result, kept even when the serialized
    /// payload had to be truncated.
    pub result_ref: Option<String>,
    /// Serialized result payload, possibly truncated at the codec's cap.
    pub result_json: Option<String>,
    pub error_code: Option<String>,
    pub error_msg: Option<String>,
    /// Replay window boundary. Once passed, the slot is acquirable again.
    pub expire_at: SystemTime,
    /// Lease boundary. A `Processing` record with a live lease cannot be stolen.
    pub lock_until: SystemTime,
    pub version: u64,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}
