//! # sqlx-mysql-conn-mgr
//!
//! A minimal wrapper around SQLx that manages MySQL/MariaDB connections for a
//! single server or for a primary/replica cluster that heals itself.
//!
//! ## Core Types
//!
//! - **[`MysqlDatabase`]**: Main database type, backed by one pool or by a [`PoolCluster`]
//! - **[`MysqlDatabaseConfig`]**: Connection and pool settings
//! - **[`ClusterSpec`]** / **[`ClusterOptions`]**: Cluster layout and node-failure policy
//! - **[`ClientConnection`]**: RAII connection returned to its pool on drop
//! - **[`Error`]**: Error type for database operations
//!
//! ## Architecture
//!
//! - **Lazy pools**: Pools connect on first use, so construction never blocks on a down node
//! - **Roles**: Cluster nodes are registered as `rw0, rw1, …` and `ro0, ro1, …`
//! - **Role wildcards**: Acquiring with role `ro` picks any `ro*` node round-robin
//! - **Self-healing**: A node that keeps failing is removed and re-added after a fixed delay
//!
//! ## Usage
//!
//! ```no_run
//! use sqlx_mysql_conn_mgr::{MysqlDatabase, MysqlDatabaseConfig};
//!
//! #[tokio::main]
//! async fn main() -> sqlx_mysql_conn_mgr::Result<()> {
//!     let config = MysqlDatabaseConfig {
//!         host: "127.0.0.1".into(),
//!         user: "app".into(),
//!         password: Some("secret".into()),
//!         database: Some("accounts".into()),
//!         ..Default::default()
//!     };
//!     let db = MysqlDatabase::connect(config, None)?;
//!
//!     let mut conn = db.acquire(None).await?;
//!     sqlx::query("INSERT INTO users (name) VALUES (?)")
//!         .bind("Alice")
//!         .execute(&mut *conn)
//!         .await?;
//!     drop(conn);
//!
//!     db.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Principles
//!
//! - Uses sqlx's `MySqlPoolOptions` for all pool configuration
//! - Uses sqlx's `MySqlConnectOptions` for connection flags and TLS
//! - The node table is private to the process; no cross-process coordination
//!
mod cluster;
mod config;
mod connection;
mod database;
mod error;

// Re-export public types
pub use cluster::{ClusterEvent, PoolCluster};
pub use config::{ClusterOptions, ClusterSpec, DEFAULT_PORT, MysqlDatabaseConfig, NodeAddress};
pub use connection::ClientConnection;
pub use database::{DEFAULT_ROLE, MysqlDatabase};
pub use error::Error;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
