pub mod digest;
pub mod handler;
pub mod key;
pub mod storage;

pub use digest::{digest, digest_serializable, sha256_hex};
pub use handler::{
    is_cacheable_status, CachedResponse, IdempotencyCleanupJob, IdempotencyHandler,
    IdempotencyHandlerConfig, IdempotencyMetrics, IdempotencyScope, LookupOutcome,
    MetricsSnapshot, SkipReason, StoreOutcome,
};
pub use key::{extract_key, normalize_endpoint, CACHED_REPLAY_HEADER, IDEMPOTENCY_KEY_HEADER};
pub use storage::{
    IdempotencyRecord, IdempotencyStore, InMemoryIdempotencyStore, InsertOutcome,
    PostgresIdempotencyStore,
};
