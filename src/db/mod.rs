pub mod kv_store;
pub mod redis_config;
pub mod redis_pool;

pub use kv_store::{InMemoryKvStore, KvStore, RedisKvStore};
pub use redis_config::RedisConfig;
pub use redis_pool::RedisPool;
