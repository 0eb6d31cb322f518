use std::sync::Arc;

use async_trait::async_trait;
use sqlx_mysql_conn_mgr::{ClusterOptions, ClusterSpec, MysqlDatabase, MysqlDatabaseConfig};

use crate::client::{ConnectionProvider, MysqlClient, Pooling};
use crate::Error;

/// Wrapper around MysqlDatabase that hands out [`MysqlClient`]s.
///
/// This struct is the main entry point for interacting with MySQL through the
/// toolkit and the [`ConnectionProvider`] the upgrade coordinator consumes.
/// Cloning is cheap; clones share the same pools.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), sqlx_mysql_toolkit::Error> {
/// use sqlx_mysql_toolkit::{ConnectionProvider, DatabaseClient, DatabaseWrapper};
/// use sqlx_mysql_conn_mgr::MysqlDatabaseConfig;
///
/// let db = DatabaseWrapper::connect(MysqlDatabaseConfig::default(), None)?;
///
/// let mut client = db.get_client(None);
/// client.open().await?;
/// let user = client
///     .fetch_one("SELECT name FROM users WHERE id = ?", vec![serde_json::json!(1)])
///     .await?;
/// match user {
///     Some(row) => println!("Found: {}", row["name"]),
///     None => println!("Not found"),
/// }
/// client.close().await?;
///
/// db.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseWrapper {
   inner: Arc<MysqlDatabase>,
   pooling: Pooling,
}

impl DatabaseWrapper {
   /// Connect to a single server, or to a cluster when `cluster` is given.
   ///
   /// Pools connect lazily; this must be called from within a Tokio runtime.
   pub fn connect(
      config: MysqlDatabaseConfig,
      cluster: Option<ClusterSpec>,
   ) -> Result<Self, Error> {
      Self::connect_with_options(config, cluster, ClusterOptions::default(), Pooling::Pooled)
   }

   /// Connect with explicit cluster behaviour and client pooling mode.
   pub fn connect_with_options(
      config: MysqlDatabaseConfig,
      cluster: Option<ClusterSpec>,
      options: ClusterOptions,
      pooling: Pooling,
   ) -> Result<Self, Error> {
      let db = MysqlDatabase::connect_with_options(config, cluster, options)?;
      Ok(Self { inner: db, pooling })
   }

   /// Get the inner Arc<MysqlDatabase> for advanced usage
   ///
   /// This is useful for raw sqlx queries or to inspect the cluster node table.
   pub fn inner(&self) -> &Arc<MysqlDatabase> {
      &self.inner
   }

   pub fn pooling(&self) -> Pooling {
      self.pooling
   }
}

#[async_trait]
impl ConnectionProvider for DatabaseWrapper {
   type Client = MysqlClient;

   fn get_client(&self, pool_selector: Option<&str>) -> MysqlClient {
      MysqlClient::new(Arc::clone(&self.inner), pool_selector, self.pooling)
   }

   /// Close every pool. In-flight clients fail on their next query.
   async fn close(&self) -> Result<(), Error> {
      self.inner.close().await?;
      Ok(())
   }
}
