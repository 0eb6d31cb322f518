//! MySQL database backed by a single pool or by a primary/replica cluster

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use sqlx::mysql::MySqlPool;
use tracing::debug;

use crate::Result;
use crate::cluster::PoolCluster;
use crate::config::{ClusterOptions, ClusterSpec, MysqlDatabaseConfig};
use crate::connection::ClientConnection;
use crate::error::Error;

/// Role used when a caller does not pick one
pub const DEFAULT_ROLE: &str = "rw";

#[derive(Debug)]
enum Backend {
   Single(MySqlPool),
   Cluster(Arc<PoolCluster>),
}

/// MySQL database with connection pooling, optionally spread over a cluster.
///
/// In single mode every acquisition goes to one pool. In cluster mode nodes
/// are grouped by role (`rw`, `ro`) and acquisitions pick any node of the
/// requested role, leaving the choice of node to the cluster's round-robin.
///
/// # Example
///
/// ```no_run
/// use sqlx_mysql_conn_mgr::{ClusterSpec, MysqlDatabase, MysqlDatabaseConfig, NodeAddress};
///
/// # async fn example() -> Result<(), sqlx_mysql_conn_mgr::Error> {
/// let cluster = ClusterSpec {
///     rw: vec![NodeAddress::new("primary", 3306)],
///     ro: vec![NodeAddress::new("replica-a", 3306), NodeAddress::new("replica-b", 3306)],
/// };
/// let db = MysqlDatabase::connect(MysqlDatabaseConfig::default(), Some(cluster))?;
///
/// // Any read-only node
/// let mut conn = db.acquire(Some("ro")).await?;
/// let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
///     .fetch_one(&mut *conn)
///     .await?;
/// drop(conn);
///
/// db.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MysqlDatabase {
   backend: Backend,

   /// Callers waiting on an exhausted pool, bounded by `queue_limit`
   waiting: AtomicU32,

   queue_limit: u32,

   /// Marks database as closed to prevent further operations
   closed: AtomicBool,
}

impl MysqlDatabase {
   /// Create a single pool, or a cluster when `cluster` is given
   ///
   /// Pools connect lazily, so this never touches the network. It must be
   /// called from within a Tokio runtime.
   pub fn connect(
      config: MysqlDatabaseConfig,
      cluster: Option<ClusterSpec>,
   ) -> Result<Arc<Self>> {
      Self::connect_with_options(config, cluster, ClusterOptions::default())
   }

   /// Same as [`connect`](Self::connect) with explicit cluster behaviour
   pub fn connect_with_options(
      config: MysqlDatabaseConfig,
      cluster: Option<ClusterSpec>,
      options: ClusterOptions,
   ) -> Result<Arc<Self>> {
      let backend = match cluster {
         Some(spec) => {
            debug!(
               "Creating cluster with {} rw and {} ro node(s)",
               spec.rw.len(),
               spec.ro.len()
            );
            Backend::Cluster(PoolCluster::new(&config, &spec, options)?)
         }
         None => {
            debug!("Creating pool for {}:{}", config.host, config.port);
            Backend::Single(
               config
                  .pool_options()
                  .connect_lazy_with(config.connect_options()),
            )
         }
      };

      Ok(Arc::new(Self {
         backend,
         waiting: AtomicU32::new(0),
         queue_limit: config.queue_limit,
         closed: AtomicBool::new(false),
      }))
   }

   /// The cluster node table, when running in cluster mode
   pub fn cluster(&self) -> Option<&Arc<PoolCluster>> {
      match &self.backend {
         Backend::Cluster(cluster) => Some(cluster),
         Backend::Single(_) => None,
      }
   }

   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::SeqCst)
   }

   /// Acquire a connection
   ///
   /// In cluster mode `role` selects the node group (default `rw`) and any
   /// node under it may serve the request. The role is ignored for a single pool.
   ///
   /// Only callers that find every candidate pool exhausted count against
   /// `queue_limit`; callers an idle or unopened slot can serve never queue.
   pub async fn acquire(&self, role: Option<&str>) -> Result<ClientConnection> {
      if self.is_closed() {
         return Err(Error::DatabaseClosed);
      }

      match &self.backend {
         Backend::Single(pool) => {
            let _ticket = self.enter_queue(pool_exhausted(pool))?;
            let conn = pool.acquire().await?;
            Ok(ClientConnection::new(conn, None))
         }
         Backend::Cluster(cluster) => {
            let pattern = format!("{}*", role.unwrap_or(DEFAULT_ROLE));
            let _ticket = self.enter_queue(cluster.is_exhausted(&pattern))?;
            cluster.acquire(&pattern).await
         }
      }
   }

   fn enter_queue(&self, exhausted: bool) -> Result<QueueTicket<'_>> {
      if self.queue_limit == 0 || !exhausted {
         return Ok(QueueTicket(None));
      }

      let previous = self.waiting.fetch_add(1, Ordering::SeqCst);
      if previous >= self.queue_limit {
         self.waiting.fetch_sub(1, Ordering::SeqCst);
         return Err(Error::QueueLimitReached(self.queue_limit));
      }

      Ok(QueueTicket(Some(&self.waiting)))
   }

   /// Close every pool
   ///
   /// Idle connections are closed right away; checked-out connections are
   /// closed as they are returned. Pending node reinsertions are cancelled.
   /// After calling close, acquisitions return `Error::DatabaseClosed`.
   pub async fn close(&self) -> Result<()> {
      self.closed.store(true, Ordering::SeqCst);

      match &self.backend {
         Backend::Single(pool) => pool.close().await,
         Backend::Cluster(cluster) => cluster.close().await,
      }

      Ok(())
   }
}

/// No idle connection and no room to open another
pub(crate) fn pool_exhausted(pool: &MySqlPool) -> bool {
   pool.num_idle() == 0 && pool.size() >= pool.options().get_max_connections()
}

/// Slot in the acquisition queue, released on drop
struct QueueTicket<'a>(Option<&'a AtomicU32>);

impl Drop for QueueTicket<'_> {
   fn drop(&mut self) {
      if let Some(waiting) = self.0 {
         waiting.fetch_sub(1, Ordering::SeqCst);
      }
   }
}
