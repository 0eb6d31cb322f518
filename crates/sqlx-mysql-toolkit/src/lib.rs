//! High-level MySQL toolkit providing the database client capability and type decoding.
//!
//! This crate sits between the low-level connection manager (`sqlx-mysql-conn-mgr`)
//! and application-level code (e.g., the schema upgrade coordinator). It provides:
//!
//! - [`DatabaseClient`]: open/close/query capability implemented by [`MysqlClient`]
//! - [`ConnectionProvider`]: source of clients, implemented by [`DatabaseWrapper`]
//! - JSON type decoding for MySQL values
//!
//! # Example
//!
//! ```no_run
//! use sqlx_mysql_toolkit::{ConnectionProvider, DatabaseClient, DatabaseWrapper};
//! use sqlx_mysql_conn_mgr::MysqlDatabaseConfig;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseWrapper::connect(MysqlDatabaseConfig::default(), None)?;
//! let mut client = db.get_client(None);
//! client.open().await?;
//!
//! // Write
//! client.execute("INSERT INTO users (name) VALUES (?)", vec![json!("Alice")]).await?;
//!
//! // Read
//! let rows = client.fetch_all("SELECT * FROM users", vec![]).await?;
//! println!("{} users on {}", rows.len(), client.get_server_version().await?);
//!
//! client.close().await?;
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod decode;
pub mod error;
pub mod wrapper;

pub use client::{
   ConnectionProvider, DatabaseClient, MysqlClient, Pooling, Row, SERVER_VERSION_QUERY,
   WriteQueryResult, bind_value, server_version_from_rows,
};
pub use error::{ER_NO_SUCH_TABLE, ER_TABLE_EXISTS_ERROR, Error, Result};
pub use wrapper::DatabaseWrapper;

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use sqlx_mysql_conn_mgr::{
   ClusterEvent, ClusterOptions, ClusterSpec, MysqlDatabase, MysqlDatabaseConfig, NodeAddress,
};
