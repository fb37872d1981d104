pub mod app_config;
pub mod database;
pub mod events;
pub mod lock;
pub mod memory;
pub mod order_repo;
pub mod redis_repo;
pub mod seat_repo;

pub use app_config::{Config, TicketingRules};
pub use database::DbClient;
pub use events::EventProducer;
pub use lock::RedisLockCoordinator;
pub use order_repo::PgOrderGateway;
pub use redis_repo::RedisClient;
pub use seat_repo::PgSeatRepository;
