//! Error types for sqlx-mysql-conn-mgr

use thiserror::Error;

/// Errors that may occur when working with sqlx-mysql-conn-mgr
#[derive(Error, Debug)]
pub enum Error {
   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Database has been closed and cannot be used
   #[error("Database has been closed")]
   DatabaseClosed,

   /// No cluster node is registered under the requested pattern
   #[error("No cluster node matches pattern '{0}'")]
   NoMatchingNodes(String),

   /// Too many callers are already waiting for a connection
   #[error("Connection queue limit of {0} reached")]
   QueueLimitReached(u32),

   /// A node with the same identifier is already part of the cluster
   #[error("Cluster node '{0}' already exists")]
   DuplicateNode(String),

   /// Cluster layout cannot be used
   #[error("Invalid cluster: {0}")]
   InvalidCluster(String),
}
