//! Database client capability and its MySQL implementation

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::MySql;
use sqlx::mysql::MySqlArguments;
use sqlx::query::Query;
use sqlx_mysql_conn_mgr::{ClientConnection, MysqlDatabase};
use tracing::trace;

use crate::decode::row_to_json;
use crate::{Error, Result};

/// A decoded result row, keyed by column name in select order.
pub type Row = IndexMap<String, JsonValue>;

/// Query used to read the engine's version metadata.
pub const SERVER_VERSION_QUERY: &str = "SHOW VARIABLES LIKE 'version%'";

/// Comment reported when the server does not expose `version_comment`.
const DEFAULT_VERSION_COMMENT: &str = "Mysql";

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE, DDL).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteQueryResult {
   /// The number of rows affected by the write operation.
   pub rows_affected: u64,
   /// The AUTO_INCREMENT value generated by an INSERT, 0 otherwise.
   pub last_insert_id: u64,
}

/// One logical database connection: open it, query it, close it.
///
/// Implementations hold at most one physical connection between `open` and
/// `close`. Calling `open` twice without closing is a caller error.
#[async_trait]
pub trait DatabaseClient: Send {
   /// Acquire a physical connection.
   async fn open(&mut self) -> Result<()>;

   /// Release the physical connection. No-op if the client was never opened.
   async fn close(&mut self) -> Result<()>;

   /// First row of the result set, or `None` when the query matched nothing.
   async fn fetch_one(&mut self, sql: &str, params: Vec<JsonValue>) -> Result<Option<Row>>;

   /// All rows of the result set; empty when the query matched nothing.
   async fn fetch_all(&mut self, sql: &str, params: Vec<JsonValue>) -> Result<Vec<Row>>;

   /// Run a statement that returns no rows.
   async fn execute(&mut self, sql: &str, params: Vec<JsonValue>) -> Result<WriteQueryResult>;

   /// Engine description formatted as `"<comment>, <version>"`.
   async fn get_server_version(&mut self) -> Result<String> {
      let rows = self.fetch_all(SERVER_VERSION_QUERY, vec![]).await?;
      Ok(server_version_from_rows(&rows))
   }
}

/// Source of database clients, optionally scoped to a named sub-pool.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
   type Client: DatabaseClient + 'static;

   /// Create an unopened client. `pool_selector` picks a cluster role (default `rw`).
   fn get_client(&self, pool_selector: Option<&str>) -> Self::Client;

   /// Release every pooled connection.
   async fn close(&self) -> Result<()>;
}

/// Format the rows of [`SERVER_VERSION_QUERY`] as `"<comment>, <version>"`.
pub fn server_version_from_rows(rows: &[Row]) -> String {
   let mut version = None;
   let mut comment = None;

   for row in rows {
      let value = row.get("Value").and_then(JsonValue::as_str);
      match row.get("Variable_name").and_then(JsonValue::as_str) {
         Some("version") => version = value,
         Some("version_comment") => comment = value,
         _ => {}
      }
   }

   format!(
      "{}, {}",
      comment
         .filter(|c| !c.is_empty())
         .unwrap_or(DEFAULT_VERSION_COMMENT),
      version.unwrap_or("unknown")
   )
}

/// What happens to the physical connection when a client closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
   /// Return the connection to its pool.
   #[default]
   Pooled,
   /// Close the connection; every client gets a fresh one.
   Unpooled,
}

/// [`DatabaseClient`] over a [`MysqlDatabase`], single pool or cluster.
#[derive(Debug)]
pub struct MysqlClient {
   db: Arc<MysqlDatabase>,
   role: Option<String>,
   pooling: Pooling,
   conn: Option<ClientConnection>,
}

impl MysqlClient {
   pub fn new(db: Arc<MysqlDatabase>, role: Option<&str>, pooling: Pooling) -> Self {
      Self {
         db,
         role: role.map(str::to_string),
         pooling,
         conn: None,
      }
   }

   pub fn is_open(&self) -> bool {
      self.conn.is_some()
   }

   /// Cluster node serving this client, once open.
   pub fn node_id(&self) -> Option<&str> {
      self.conn.as_ref().and_then(|c| c.node_id())
   }

   fn conn_mut(&mut self) -> Result<&mut ClientConnection> {
      self.conn.as_mut().ok_or(Error::NotOpen)
   }
}

#[async_trait]
impl DatabaseClient for MysqlClient {
   async fn open(&mut self) -> Result<()> {
      let conn = self.db.acquire(self.role.as_deref()).await?;
      trace!("Client opened on node {:?}", conn.node_id());
      self.conn = Some(conn);
      Ok(())
   }

   async fn close(&mut self) -> Result<()> {
      let Some(conn) = self.conn.take() else {
         return Ok(());
      };

      match self.pooling {
         Pooling::Pooled => drop(conn),
         Pooling::Unpooled => conn.discard().await?,
      }
      Ok(())
   }

   async fn fetch_one(&mut self, sql: &str, params: Vec<JsonValue>) -> Result<Option<Row>> {
      let conn = self.conn_mut()?;
      let row = build_query(sql, params).fetch_optional(&mut **conn).await?;
      row.as_ref().map(row_to_json).transpose()
   }

   async fn fetch_all(&mut self, sql: &str, params: Vec<JsonValue>) -> Result<Vec<Row>> {
      let conn = self.conn_mut()?;
      let rows = build_query(sql, params).fetch_all(&mut **conn).await?;
      rows.iter().map(row_to_json).collect()
   }

   async fn execute(&mut self, sql: &str, params: Vec<JsonValue>) -> Result<WriteQueryResult> {
      let conn = self.conn_mut()?;
      let result = build_query(sql, params).execute(&mut **conn).await?;
      Ok(WriteQueryResult {
         rows_affected: result.rows_affected(),
         last_insert_id: result.last_insert_id(),
      })
   }
}

fn build_query(sql: &str, params: Vec<JsonValue>) -> Query<'_, MySql, MySqlArguments> {
   params
      .into_iter()
      .fold(sqlx::query(sql), |q, value| bind_value(q, value))
}

/// Helper function to bind a JSON value to a SQLx query
pub fn bind_value<'a>(
   query: Query<'a, MySql, MySqlArguments>,
   value: JsonValue,
) -> Query<'a, MySql, MySqlArguments> {
   match value {
      JsonValue::Null => query.bind(None::<JsonValue>),
      JsonValue::Bool(b) => query.bind(b),
      JsonValue::String(s) => query.bind(s),
      JsonValue::Number(number) => {
         // Preserve integer precision, including the full unsigned range
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            query.bind(uint_val)
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      other => query.bind(other),
   }
}
