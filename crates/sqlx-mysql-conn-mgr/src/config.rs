//! Configuration for MySQL connection pools and clusters

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};

use crate::Result;
use crate::error::Error;

/// Default MySQL server port
pub const DEFAULT_PORT: u16 = 3306;

/// Connection settings shared by a single pool or by every node of a cluster
///
/// # Examples
///
/// ```
/// use sqlx_mysql_conn_mgr::MysqlDatabaseConfig;
///
/// let config = MysqlDatabaseConfig {
///     host: "db.internal".into(),
///     user: "app".into(),
///     password: Some("secret".into()),
///     database: Some("accounts".into()),
///     ..Default::default()
/// };
/// assert_eq!(config.port, 3306);
/// assert_eq!(config.connection_limit, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MysqlDatabaseConfig {
   /// Server host name or address. Overridden per node in cluster mode.
   pub host: String,

   /// Server port. Overridden per node in cluster mode.
   ///
   /// Default: 3306
   pub port: u16,

   pub user: String,

   pub password: Option<String>,

   /// Default schema selected on connect
   pub database: Option<String>,

   /// Maximum number of physical connections per pool
   ///
   /// In cluster mode every node gets its own pool of this size.
   ///
   /// Default: 10
   pub connection_limit: u32,

   /// Maximum number of callers allowed to wait for a connection at once
   ///
   /// Callers beyond this limit fail immediately with
   /// [`Error::QueueLimitReached`]. Zero means unbounded.
   ///
   /// Default: 0
   pub queue_limit: u32,

   /// Session time zone applied to every connection
   ///
   /// Default: `+00:00`
   pub timezone: Option<String>,

   /// CA certificate used to verify the server. Enables TLS when set.
   pub ssl_ca: Option<PathBuf>,

   /// How long an acquisition may wait for a free or new connection (in milliseconds)
   ///
   /// Default: 10000
   pub acquire_timeout_ms: u64,

   /// Idle connections are closed after this many seconds
   ///
   /// Default: 30
   pub idle_timeout_secs: u64,
}

impl Default for MysqlDatabaseConfig {
   fn default() -> Self {
      Self {
         host: "localhost".into(),
         port: DEFAULT_PORT,
         user: "root".into(),
         password: None,
         database: None,
         connection_limit: 10,
         queue_limit: 0,
         timezone: Some("+00:00".into()),
         ssl_ca: None,
         acquire_timeout_ms: 10_000,
         idle_timeout_secs: 30,
      }
   }
}

impl MysqlDatabaseConfig {
   /// Copy of this config pointing at another host and port
   pub fn for_node(&self, address: &NodeAddress) -> Self {
      Self {
         host: address.host.clone(),
         port: address.port,
         ..self.clone()
      }
   }

   pub(crate) fn connect_options(&self) -> MySqlConnectOptions {
      let mut options = MySqlConnectOptions::new()
         .host(&self.host)
         .port(self.port)
         .username(&self.user)
         .timezone(self.timezone.clone());

      if let Some(password) = &self.password {
         options = options.password(password);
      }
      if let Some(database) = &self.database {
         options = options.database(database);
      }
      if let Some(ca) = &self.ssl_ca {
         options = options.ssl_mode(MySqlSslMode::VerifyCa).ssl_ca(ca);
      }

      options
   }

   pub(crate) fn pool_options(&self) -> MySqlPoolOptions {
      MySqlPoolOptions::new()
         .max_connections(self.connection_limit)
         .min_connections(0)
         .acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
         .idle_timeout(Some(Duration::from_secs(self.idle_timeout_secs)))
   }
}

/// Host and port of one cluster node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
   pub host: String,
   #[serde(default = "default_port")]
   pub port: u16,
}

impl NodeAddress {
   pub fn new(host: impl Into<String>, port: u16) -> Self {
      Self {
         host: host.into(),
         port,
      }
   }
}

fn default_port() -> u16 {
   DEFAULT_PORT
}

/// Primary/replica layout of a cluster
///
/// Read-write nodes are registered as `rw0, rw1, …` and read-only nodes as
/// `ro0, ro1, …`, in the order given here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
   #[serde(default)]
   pub rw: Vec<NodeAddress>,
   #[serde(default)]
   pub ro: Vec<NodeAddress>,
}

impl ClusterSpec {
   /// Ensure the cluster has a primary to write to
   pub fn validate(&self) -> Result<()> {
      if self.rw.is_empty() {
         return Err(Error::InvalidCluster("no primary server defined".into()));
      }
      if let Some(node) = self.rw.iter().chain(&self.ro).find(|n| n.host.is_empty()) {
         return Err(Error::InvalidCluster(format!(
            "node with port {} has no host",
            node.port
         )));
      }
      Ok(())
   }

   /// Node identifiers paired with their addresses, read-write nodes first
   pub fn node_ids(&self) -> impl Iterator<Item = (String, &NodeAddress)> {
      let rw = self
         .rw
         .iter()
         .enumerate()
         .map(|(i, node)| (format!("rw{i}"), node));
      let ro = self
         .ro
         .iter()
         .enumerate()
         .map(|(i, node)| (format!("ro{i}"), node));
      rw.chain(ro)
   }
}

/// Behaviour of the cluster node table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
   /// Try the next matching node when acquiring from one node fails
   ///
   /// Default: true
   pub can_retry: bool,

   /// Consecutive acquisition failures after which a node is removed
   ///
   /// Default: 5
   pub remove_node_error_count: u32,

   /// Delay before a removed node is offered to the cluster again (in milliseconds)
   ///
   /// Default: 5000
   pub reinsert_delay_ms: u64,
}

impl Default for ClusterOptions {
   fn default() -> Self {
      Self {
         can_retry: true,
         remove_node_error_count: 5,
         reinsert_delay_ms: 5_000,
      }
   }
}
