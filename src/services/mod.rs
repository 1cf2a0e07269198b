// Service exports
pub mod cache;
pub mod postgres;
pub mod store;

pub use cache::{CacheError, CacheKey, CacheStats, ResultCache};
pub use postgres::PostgresStore;
pub use store::{MemoryStore, PropertyStore, StoreError};
