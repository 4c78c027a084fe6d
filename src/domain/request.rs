use std::time::Duration;

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Caller-supplied description of one guarded invocation.
///
/// `(tenant_id, biz_type, idem_key)` identifies the operation instance;
/// `request_hash` is a caller-computed digest of the semantically relevant
/// input. Two calls with the same identity but different hashes are a
/// conflict, never a replay.
#[derive(Debug, Clone)]
pub struct IdempotencyRequest {
    pub tenant_id: i64,
    pub biz_type: String,
    pub idem_key: String,
    pub request_hash: String,
    /// How long a successful result remains replayable.
    pub ttl: Duration,
    /// Lease granted to whichever execution currently owns the key.
    pub lock_ttl: Duration,
    /// Whether the caller blocks while another execution owns the key.
    pub wait_for_completion: bool,
    /// Upper bound on that blocking. `None` or zero disables waiting.
    pub wait_max: Option<Duration>,
}

impl IdempotencyRequest {
    pub fn new(
        tenant_id: i64,
        biz_type: impl Into<String>,
        idem_key: impl Into<String>,
        request_hash: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            biz_type: biz_type.into(),
            idem_key: idem_key.into(),
            request_hash: request_hash.into(),
            ttl: DEFAULT_TTL,
            lock_ttl: DEFAULT_LOCK_TTL,
            wait_for_completion: false,
            wait_max: None,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    /// Opt into blocking until the owning execution finishes, bounded by
    /// `wait_max`.
    pub fn wait_for_completion(mut self, wait_max: Duration) -> Self {
        self.wait_for_completion = true;
        self.wait_max = Some(wait_max);
        self
    }

    /// Advisory lock key, derived deterministically from the identity triple.
    pub fn lock_key(&self) -> String {
        format!("idem:{}:{}:{}", self.tenant_id, self.biz_type, self.idem_key)
    }
}
