//! Store implementations owned by the booking service.
//!
//! The interval store and outbox live in `booking-postgres`; this module only
//! holds the Redis key-value store used for idempotency keys.

mod key_value_redis;

pub use key_value_redis::RedisKeyValueStore;
