use thiserror::Error;

/// Errors raised by the idempotency engine itself.
///
/// Business failures from the guarded operation are never wrapped here; they
/// travel through [`ExecuteError::Operation`] untouched.
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// The identity triple was reused with a different request hash.
    #[error(
        "idempotency conflict: tenant_id={tenant_id}, biz_type={biz_type}, idem_key={idem_key} \
         request hash differs from the stored record"
    )]
    Conflict {
        tenant_id: i64,
        biz_type: String,
        idem_key: String,
    },

    /// A waiting caller observed that the owning execution recorded a failure.
    #[error(
        "previous attempt failed: tenant_id={tenant_id}, biz_type={biz_type}, idem_key={idem_key}"
    )]
    UpstreamFailed {
        tenant_id: i64,
        biz_type: String,
        idem_key: String,
        error_msg: Option<String>,
    },

    /// Persistence-layer failure, including an exhausted acquire retry budget.
    #[error("idempotency storage error: {0}")]
    Storage(String),

    /// A stored result payload could not be decoded back into the result type.
    #[error("result payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IdempotencyError>;

/// Failure outcome of an `execute` call.
///
/// Keeps the caller's own error type `E` separate from engine errors so that
/// business failures are re-raised verbatim.
#[derive(Error, Debug)]
pub enum ExecuteError<E: std::error::Error> {
    /// The guarded operation itself failed. Recorded best-effort in the store
    /// and passed through unchanged.
    #[error(transparent)]
    Operation(E),

    /// The engine failed: conflict, upstream failure, storage or codec error.
    #[error(transparent)]
    Engine(#[from] IdempotencyError),
}

impl<E: std::error::Error> ExecuteError<E> {
    /// True when this is a request-hash conflict on the identity triple.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Engine(IdempotencyError::Conflict { .. }))
    }
}
