//! Infrastructure layer: clock implementations, the in-memory reference
//! store and locks, and the optional RocksDB-backed store.

pub mod clock;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
