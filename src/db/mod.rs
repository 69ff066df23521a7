//! Database layer: the capability contract, per-backend session variants,
//! the bounded connection pool, and the pool registry.

pub mod connection;
pub mod factory;
pub mod mongo;
pub mod mysql;
pub mod pool;
pub mod postgres;
pub mod redis;
pub mod registry;
pub mod sqlite;
mod statement;
pub mod value;

pub use connection::{Connection, ConnectionFactory};
pub use factory::BackendFactory;
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use self::redis::subscriber::PubSubEvent;
pub use registry::PoolRegistry;
