//! Checked-out connection handed to a database client

use std::ops::{Deref, DerefMut};

use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql, MySqlConnection};

use crate::Result;

/// RAII wrapper around a pooled MySQL connection
///
/// Dropping the wrapper returns the connection to the pool it came from.
/// Call [`discard`](Self::discard) instead to close the physical connection,
/// which is what unpooled clients do on close.
///
/// The wrapper derefs to `MySqlConnection` allowing direct use with sqlx queries.
///
/// # Example
///
/// ```no_run
/// use sqlx_mysql_conn_mgr::{MysqlDatabase, MysqlDatabaseConfig};
///
/// # async fn example() -> Result<(), sqlx_mysql_conn_mgr::Error> {
/// let db = MysqlDatabase::connect(MysqlDatabaseConfig::default(), None)?;
/// let mut conn = db.acquire(None).await?;
/// sqlx::query("UPDATE counters SET hits = hits + 1")
///     .execute(&mut *conn)
///     .await?;
/// // Connection is returned to its pool when dropped
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ClientConnection {
   conn: PoolConnection<MySql>,
   node_id: Option<String>,
}

impl ClientConnection {
   pub(crate) fn new(conn: PoolConnection<MySql>, node_id: Option<String>) -> Self {
      Self { conn, node_id }
   }

   /// Cluster node the connection was taken from; `None` for a single pool
   pub fn node_id(&self) -> Option<&str> {
      self.node_id.as_deref()
   }

   /// Close the physical connection instead of returning it to the pool
   pub async fn discard(self) -> Result<()> {
      self.conn.detach().close().await?;
      Ok(())
   }
}

impl Deref for ClientConnection {
   type Target = MySqlConnection;

   fn deref(&self) -> &Self::Target {
      &self.conn
   }
}

impl DerefMut for ClientConnection {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut self.conn
   }
}
