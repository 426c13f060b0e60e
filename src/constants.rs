//! Centralized environment variable names and default values for runtime tuning.

// Environment variable names
pub const ENV_NUM_THREADS: &str = "YMIR_NUM_THREADS";

// Shared-memory layout
// Seven segments per thread keeps lock collisions improbable while per-segment
// tables stay small enough to rehash cheaply.
pub const SEGMENTS_PER_THREAD: usize = 7;

// Bucket arrays always start at the smallest prime of the cascade.
pub const N_INITIAL_BUCKETS: usize = 11;

// Staging caches are pre-sized at reserve(n) to n / CACHE_RESERVE_DIVISOR:
// small enough to stay cache-resident, large enough to absorb bursts.
pub const CACHE_RESERVE_DIVISOR: usize = 1000;

// Chained tables rehash once n_keys exceeds n_buckets * max_load_factor.
pub const DEFAULT_MAX_LOAD_FACTOR: f32 = 1.0;
