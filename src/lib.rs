//! db-conduit
//!
//! Connection-pool core for desktop database tools: one uniform command
//! surface (query, batch, transaction, metadata, pub/sub) over SQL and
//! key-value backends, with backend-specific connection lifecycles hidden
//! behind a bounded resource pool per endpoint.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{DatabaseUrl, PoolSettings};
pub use db::{PoolRegistry, PoolStatus, PubSubEvent};
pub use error::{ConduitError, ConduitResult};
pub use models::{BackendKind, ConnectionConfig, QueryParam, QueryResult};
