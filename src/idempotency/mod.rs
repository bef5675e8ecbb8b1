pub mod coordinator;
pub mod fingerprint;
pub mod storage;

pub use coordinator::{
    CacheLookup, Idempotent, IdempotencyCleanupJob, IdempotencyCoordinator, IdempotencyMetrics,
    MetricsSnapshot,
};
pub use fingerprint::{IdempotencyKey, RequestFingerprinter, MAX_KEY_LENGTH};
pub use storage::{
    IdempotencyRecord, IdempotencyStore, InMemoryIdempotencyStore, PostgresIdempotencyStore,
    RedisIdempotencyStore,
};
