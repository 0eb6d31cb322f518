//! Cluster of per-node pools with automatic node removal and reinsertion
//!
//! Every node owns its own lazily connected pool. Acquisition walks the nodes
//! matching a pattern (e.g. `rw*`) round-robin. A node that keeps failing is
//! taken out of rotation and, after a fixed delay, put back with its original
//! configuration under the same identifier. If the node is still down it will
//! simply be removed again, restarting the cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use sqlx::mysql::MySqlPool;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::{ClusterOptions, ClusterSpec, MysqlDatabaseConfig};
use crate::connection::ClientConnection;
use crate::database::pool_exhausted;
use crate::error::Error;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Membership change of the cluster node table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
   /// Node was judged unreachable and taken out of rotation
   NodeRemoved(String),
   /// Node was (re)inserted into rotation
   NodeAdded(String),
}

struct ClusterNode {
   config: MysqlDatabaseConfig,
   pool: MySqlPool,
   error_count: u32,
}

#[derive(Default)]
struct NodeTable {
   nodes: IndexMap<String, ClusterNode>,
   /// Round-robin position per acquisition pattern
   cursors: HashMap<String, usize>,
}

/// Read-write and read-only node pools addressed by identifier
pub struct PoolCluster {
   table: Mutex<NodeTable>,
   options: ClusterOptions,
   events: broadcast::Sender<ClusterEvent>,
   reinsertions: Mutex<Vec<AbortHandle>>,
   closed: AtomicBool,
}

impl std::fmt::Debug for PoolCluster {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("PoolCluster")
         .field("nodes", &self.node_ids())
         .field("options", &self.options)
         .finish_non_exhaustive()
   }
}

impl PoolCluster {
   /// Build the node table from a cluster layout
   ///
   /// Each node inherits `config` with host and port overridden. Pools are
   /// created lazily, so unreachable nodes do not fail construction.
   pub(crate) fn new(
      config: &MysqlDatabaseConfig,
      spec: &ClusterSpec,
      options: ClusterOptions,
   ) -> Result<Arc<Self>> {
      spec.validate()?;

      let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
      let cluster = Arc::new(Self {
         table: Mutex::new(NodeTable::default()),
         options,
         events,
         reinsertions: Mutex::new(Vec::new()),
         closed: AtomicBool::new(false),
      });

      for (id, address) in spec.node_ids() {
         cluster.add_node(&id, config.for_node(address))?;
      }

      Ok(cluster)
   }

   /// Register a node under `id`
   ///
   /// Fails with [`Error::DuplicateNode`] if the identifier is already in use.
   pub fn add_node(&self, id: &str, config: MysqlDatabaseConfig) -> Result<()> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::DatabaseClosed);
      }

      let mut table = self.table.lock();
      if table.nodes.contains_key(id) {
         return Err(Error::DuplicateNode(id.to_string()));
      }

      let pool = config
         .pool_options()
         .connect_lazy_with(config.connect_options());
      table.nodes.insert(
         id.to_string(),
         ClusterNode {
            config,
            pool,
            error_count: 0,
         },
      );
      drop(table);

      let _ = self.events.send(ClusterEvent::NodeAdded(id.to_string()));
      Ok(())
   }

   /// Take a node out of rotation and schedule its reinsertion
   ///
   /// Returns the configuration the node was registered with, or `None` if no
   /// such node is present. Every removal schedules exactly one reinsertion;
   /// repeated removals of the same identifier are not deduplicated.
   ///
   /// # Panics
   ///
   /// Closing the removed pool and the reinsertion run as Tokio tasks, so this
   /// must be called from within a Tokio runtime.
   pub fn remove_node(self: &Arc<Self>, id: &str) -> Option<MysqlDatabaseConfig> {
      let removed = self.table.lock().nodes.shift_remove(id)?;
      warn!("Cluster node {} removed", id);

      // Connections still checked out finish their work; the pool closes behind them
      let pool = removed.pool;
      tokio::spawn(async move { pool.close().await });

      let _ = self.events.send(ClusterEvent::NodeRemoved(id.to_string()));

      if !self.closed.load(Ordering::SeqCst) {
         self.schedule_reinsertion(id.to_string(), removed.config.clone());
      }

      Some(removed.config)
   }

   fn schedule_reinsertion(self: &Arc<Self>, id: String, config: MysqlDatabaseConfig) {
      let cluster: Weak<Self> = Arc::downgrade(self);
      let delay = Duration::from_millis(self.options.reinsert_delay_ms);

      let handle = tokio::spawn(async move {
         tokio::time::sleep(delay).await;

         let Some(cluster) = cluster.upgrade() else {
            return;
         };

         match cluster.add_node(&id, config) {
            Ok(()) => info!("Cluster node {} added back", id),
            Err(Error::DuplicateNode(_)) => {
               debug!("Cluster node {} already present, skipping reinsertion", id)
            }
            Err(Error::DatabaseClosed) => debug!("Cluster closed before node {} returned", id),
            Err(e) => warn!("Failed to add back cluster node {}: {}", id, e),
         }
      });

      let mut pending = self.reinsertions.lock();
      pending.retain(|h| !h.is_finished());
      pending.push(handle.abort_handle());
   }

   /// Identifiers of the nodes currently in rotation, in registration order
   pub fn node_ids(&self) -> Vec<String> {
      self.table.lock().nodes.keys().cloned().collect()
   }

   /// Configuration a node is registered with
   pub fn node_config(&self, id: &str) -> Option<MysqlDatabaseConfig> {
      self.table.lock().nodes.get(id).map(|n| n.config.clone())
   }

   /// Number of reinsertions scheduled but not yet run
   pub fn pending_reinsertions(&self) -> usize {
      self
         .reinsertions
         .lock()
         .iter()
         .filter(|h| !h.is_finished())
         .count()
   }

   /// Subscribe to node membership changes
   pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
      self.events.subscribe()
   }

   /// Nodes matching `pattern`, rotated so that consecutive calls start on different nodes
   fn candidates(&self, pattern: &str) -> Vec<(String, MySqlPool)> {
      let mut table = self.table.lock();
      let mut matching: Vec<(String, MySqlPool)> = table
         .nodes
         .iter()
         .filter(|(id, _)| pattern_matches(pattern, id))
         .map(|(id, node)| (id.clone(), node.pool.clone()))
         .collect();

      if matching.is_empty() {
         return matching;
      }

      let cursor = table.cursors.entry(pattern.to_string()).or_insert(0);
      let start = *cursor % matching.len();
      *cursor = start + 1;
      matching.rotate_left(start);
      matching
   }

   /// Whether every node matching `pattern` is out of connections
   ///
   /// `false` when nothing matches, so the caller reaches the pattern error.
   pub(crate) fn is_exhausted(&self, pattern: &str) -> bool {
      let table = self.table.lock();
      let mut matching = table
         .nodes
         .iter()
         .filter(|(id, _)| pattern_matches(pattern, id))
         .peekable();
      matching.peek().is_some() && matching.all(|(_, node)| pool_exhausted(&node.pool))
   }

   /// Acquire a connection from any node matching `pattern`
   ///
   /// Patterns ending in `*` match every identifier with that prefix, so `rw*`
   /// selects among `rw0, rw1, …`. Failed nodes accumulate errors and are
   /// removed once they reach the configured threshold.
   pub async fn acquire(self: &Arc<Self>, pattern: &str) -> Result<ClientConnection> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::DatabaseClosed);
      }

      let candidates = self.candidates(pattern);
      if candidates.is_empty() {
         return Err(Error::NoMatchingNodes(pattern.to_string()));
      }

      let mut last_error = None;
      for (id, pool) in candidates {
         match pool.acquire().await {
            Ok(conn) => {
               self.record_success(&id);
               return Ok(ClientConnection::new(conn, Some(id)));
            }
            Err(e) => {
               warn!("Failed to acquire connection from node {}: {}", id, e);
               self.record_failure(&id);
               last_error = Some(e);
               if !self.options.can_retry {
                  break;
               }
            }
         }
      }

      match last_error {
         Some(e) => Err(Error::Sqlx(e)),
         None => Err(Error::NoMatchingNodes(pattern.to_string())),
      }
   }

   fn record_success(&self, id: &str) {
      if let Some(node) = self.table.lock().nodes.get_mut(id) {
         node.error_count = 0;
      }
   }

   fn record_failure(self: &Arc<Self>, id: &str) {
      let exhausted = {
         let mut table = self.table.lock();
         match table.nodes.get_mut(id) {
            Some(node) => {
               node.error_count += 1;
               node.error_count >= self.options.remove_node_error_count
            }
            None => false,
         }
      };

      if exhausted {
         self.remove_node(id);
      }
   }

   /// Stop pending reinsertions and close every node pool
   pub async fn close(&self) {
      self.closed.store(true, Ordering::SeqCst);

      for handle in self.reinsertions.lock().drain(..) {
         handle.abort();
      }

      let pools: Vec<MySqlPool> = {
         let mut table = self.table.lock();
         table.cursors.clear();
         table.nodes.drain(..).map(|(_, node)| node.pool).collect()
      };

      for pool in pools {
         pool.close().await;
      }
   }
}

/// Match a node identifier against an acquisition pattern
///
/// A trailing `*` is a prefix wildcard; anything else must match exactly.
pub(crate) fn pattern_matches(pattern: &str, id: &str) -> bool {
   match pattern.strip_suffix('*') {
      Some(prefix) => id.starts_with(prefix),
      None => id == pattern,
   }
}
