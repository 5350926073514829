//! Adapters implementing the ports against real infrastructure.
pub mod http_client;
pub mod http_handler;
pub mod memory_cache;
pub mod postgres_store;
pub mod redis_cache;

pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use memory_cache::MemoryCache;
pub use postgres_store::PostgresStore;
pub use redis_cache::RedisCache;
