pub mod channel;
pub mod memory_store;
pub mod postgres_relation;
pub mod redis_store;
pub mod route_client;
pub mod storage_client;

pub use channel::{Channel, ChannelHandler, ChannelSubscription};
pub use memory_store::{
    MemoryCollaborators, MemoryDeviceRegistry, MemoryLoginPointStore, MemoryRelationStore,
    MemoryTokenStore,
};
pub use postgres_relation::PgRelationStore;
pub use redis_store::{RedisDeviceRegistry, RedisLoginPointStore, RedisTokenStore};
pub use route_client::RouteClient;
pub use storage_client::StorageClient;
