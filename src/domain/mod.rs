//! Domain layer: the idempotency record model, the per-call request value,
//! and the ports implemented by the infrastructure layer.

pub mod ports;
pub mod record;
pub mod request;
