pub mod app_config;
pub mod events;
pub mod queue_db;
pub mod redis_repo;

pub use app_config::{Config, StoreBackend};
pub use events::EventBus;
pub use queue_db::SqliteQueueStorage;
pub use redis_repo::RedisStore;
