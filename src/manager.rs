//! Schema version check: probe, claim, run the callback, record the version

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;
use sqlx_mysql_toolkit::{ConnectionProvider, DatabaseClient};
use tracing::{debug, error, info, warn};

use crate::config::UpgradeConfig;
use crate::error::{Phase, Result, UpgradeError};
use crate::handler::{CallbackResult, Callbacks, SchemaHandler};
use crate::version_table::{
   COMMIT, Probe, ROLLBACK, SET_AUTOCOMMIT_OFF, SET_AUTOCOMMIT_ON, VersionState, VersionTable,
};

/// What a successful check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
   /// This run created the version table and ran `on_init`.
   Initialized { version: i64 },
   /// This run ran `on_upgrade` from `from`.
   Upgraded { from: i64, to: i64 },
   /// Nothing to do, possibly because another instance just did it.
   UpToDate { version: i64 },
}

/// Result of attempting to create the version table.
enum CreateOutcome {
   Created,
   AlreadyExists,
}

enum Step {
   Done(CheckOutcome),
   Retry(RetryReason),
}

#[derive(Debug, PartialEq, Eq)]
enum RetryReason {
   /// Another instance created the version table first.
   CreateRace,
   /// The version table exists but its row is not inserted yet.
   EmptyTable,
}

/// Brings a database to a required schema version at most once per version
/// transition, even with several instances starting together.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use mysql_upgrade_manager::{UpgradeConfig, UpgradeManager};
/// use sqlx_mysql_toolkit::{DatabaseWrapper, MysqlDatabaseConfig};
///
/// let db = DatabaseWrapper::connect(MysqlDatabaseConfig::default(), None)?;
/// let manager = UpgradeManager::new(db, UpgradeConfig::concurrent())?;
///
/// manager
///    .check_schema(
///       3,
///       |client| {
///          Box::pin(async move {
///             client.execute("CREATE TABLE users (id INTEGER PRIMARY KEY)", vec![]).await?;
///             Ok::<(), mysql_upgrade_manager::CallbackError>(())
///          })
///       },
///       |client, from_version| {
///          Box::pin(async move {
///             if from_version < 3 {
///                client.execute("UPDATE users SET id = id", vec![]).await?;
///             }
///             Ok::<(), mysql_upgrade_manager::CallbackError>(())
///          })
///       },
///    )
///    .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct UpgradeManager<P> {
   provider: P,
   config: UpgradeConfig,
   table: VersionTable,
}

impl<P: ConnectionProvider> UpgradeManager<P> {
   /// Fails only if the version table suffix is not an identifier.
   pub fn new(provider: P, config: UpgradeConfig) -> Result<Self> {
      let table = VersionTable::new(config.version_table_suffix.as_deref())?;
      Ok(Self {
         provider,
         config,
         table,
      })
   }

   pub fn provider(&self) -> &P {
      &self.provider
   }

   pub fn config(&self) -> &UpgradeConfig {
      &self.config
   }

   pub fn version_table(&self) -> &str {
      self.table.name()
   }

   /// Check the schema against `target_version` using two closures.
   ///
   /// See [`check_schema_with`](Self::check_schema_with).
   pub async fn check_schema<I, U>(
      &self,
      target_version: i64,
      on_init: I,
      on_upgrade: U,
   ) -> Result<CheckOutcome>
   where
      I: for<'c> Fn(&'c mut dyn DatabaseClient) -> BoxFuture<'c, CallbackResult> + Send + Sync,
      U: for<'c> Fn(&'c mut dyn DatabaseClient, i64) -> BoxFuture<'c, CallbackResult>
         + Send
         + Sync,
   {
      let handler = Callbacks::new(on_init, on_upgrade);
      self.check_schema_with(target_version, &handler).await
   }

   /// Bring the schema to `target_version`.
   ///
   /// Runs `on_init` when the version table does not exist yet, `on_upgrade`
   /// when the recorded version is lower than `target_version`, and nothing
   /// otherwise. Losing the table creation race to another instance is not an
   /// error: the check waits `race_retry_delay_ms` and starts over.
   ///
   /// `target_version` must be positive; anything else is rejected before the
   /// database is touched.
   pub async fn check_schema_with<H>(
      &self,
      target_version: i64,
      handler: &H,
   ) -> Result<CheckOutcome>
   where
      H: SchemaHandler + ?Sized,
   {
      if target_version <= 0 {
         return Err(UpgradeError::InvalidTargetVersion(target_version));
      }

      let mut empty_table_retries = 0;

      loop {
         let mut client = self.provider.get_client(None);
         client.open().await.map_err(UpgradeError::Connection)?;

         let step = self.run_check(&mut client, target_version, handler).await;

         if let Err(e) = client.close().await {
            warn!("Failed to close version check client: {}", e);
         }

         match step? {
            Step::Done(outcome) => return Ok(outcome),
            Step::Retry(RetryReason::EmptyTable)
               if empty_table_retries >= self.config.max_empty_table_retries =>
            {
               return Err(UpgradeError::StaleLock {
                  table: self.table.name().to_string(),
                  value: None,
               });
            }
            Step::Retry(reason) => {
               if reason == RetryReason::EmptyTable {
                  empty_table_retries += 1;
               }
               info!(
                  "{} is being created by another instance ({:?}), retrying in {} ms",
                  self.table.name(),
                  reason,
                  self.config.race_retry_delay_ms
               );
               tokio::time::sleep(Duration::from_millis(self.config.race_retry_delay_ms)).await;
            }
         }
      }
   }

   /// Like [`check_schema`](Self::check_schema), but a failure ends the
   /// process with the error's exit code after logging it.
   pub async fn check_schema_or_exit<I, U>(
      &self,
      target_version: i64,
      on_init: I,
      on_upgrade: U,
   ) -> CheckOutcome
   where
      I: for<'c> Fn(&'c mut dyn DatabaseClient) -> BoxFuture<'c, CallbackResult> + Send + Sync,
      U: for<'c> Fn(&'c mut dyn DatabaseClient, i64) -> BoxFuture<'c, CallbackResult>
         + Send
         + Sync,
   {
      let result = self.check_schema(target_version, on_init, on_upgrade).await;
      self.exit_on_failure(target_version, result)
   }

   /// Like [`check_schema_with`](Self::check_schema_with), but a failure ends
   /// the process with the error's exit code after logging it.
   pub async fn check_schema_with_or_exit<H>(
      &self,
      target_version: i64,
      handler: &H,
   ) -> CheckOutcome
   where
      H: SchemaHandler + ?Sized,
   {
      let result = self.check_schema_with(target_version, handler).await;
      self.exit_on_failure(target_version, result)
   }

   fn exit_on_failure(&self, target_version: i64, result: Result<CheckOutcome>) -> CheckOutcome {
      match result {
         Ok(outcome) => outcome,
         Err(e) => {
            error!(
               table = %self.table.name(),
               current_version = ?e.current_version(),
               target_version,
               code = %e.error_code(),
               exit_code = e.exit_code(),
               "FATAL: schema check failed: {}",
               e
            );
            std::process::exit(e.exit_code())
         }
      }
   }

   /// One pass over an open client. Every error path leaves no transaction open.
   async fn run_check<H>(
      &self,
      client: &mut P::Client,
      target_version: i64,
      handler: &H,
   ) -> Result<Step>
   where
      H: SchemaHandler + ?Sized,
   {
      let server_version = client
         .get_server_version()
         .await
         .map_err(UpgradeError::ServerVersion)?;
      info!("Db version {}", server_version);

      let probe = self.read_version(client).await?;
      let state = VersionState::classify(probe, target_version);
      debug!(
         "{}: {:?}, target version {}",
         self.table.name(),
         state,
         target_version
      );

      match state {
         VersionState::Uninitialized => match self.create_table(client).await? {
            CreateOutcome::AlreadyExists => {
               self.release_lock(client).await;
               Ok(Step::Retry(RetryReason::CreateRace))
            }
            CreateOutcome::Created => {
               self.initialize(client, target_version, handler).await?;
               info!("Db created at version {}", target_version);
               Ok(Step::Done(CheckOutcome::Initialized {
                  version: target_version,
               }))
            }
         },
         VersionState::Empty => {
            self.release_lock(client).await;
            if self.config.concurrent_mode {
               Ok(Step::Retry(RetryReason::EmptyTable))
            } else {
               Err(UpgradeError::StaleLock {
                  table: self.table.name().to_string(),
                  value: None,
               })
            }
         }
         VersionState::StaleLock(value) => {
            self.release_lock(client).await;
            Err(UpgradeError::StaleLock {
               table: self.table.name().to_string(),
               value: Some(value),
            })
         }
         VersionState::AtTarget => {
            self.release_lock(client).await;
            debug!("Db already at version {}", target_version);
            Ok(Step::Done(CheckOutcome::UpToDate {
               version: target_version,
            }))
         }
         VersionState::Ahead(current) => {
            self.release_lock(client).await;
            Err(UpgradeError::TargetUnreachable {
               current,
               target: target_version,
            })
         }
         VersionState::Behind(current) => {
            if let Err(source) = handler.on_upgrade(client, current).await {
               self.release_lock(client).await;
               return Err(UpgradeError::Callback {
                  phase: Phase::Upgrade,
                  current: Some(current),
                  target: target_version,
                  source,
               });
            }
            self.record_version(client, Some(current), target_version).await?;
            info!("Db updated from version {} to {}", current, target_version);
            Ok(Step::Done(CheckOutcome::Upgraded {
               from: current,
               to: target_version,
            }))
         }
      }
   }

   /// Read the version row, locking it in concurrent mode.
   ///
   /// On success in concurrent mode the client is left with autocommit off
   /// and, when the row exists, holding its lock.
   async fn read_version(&self, client: &mut P::Client) -> Result<Probe> {
      let sql = if self.config.concurrent_mode {
         client
            .execute(SET_AUTOCOMMIT_OFF, vec![])
            .await
            .map_err(|e| self.read_error(e))?;
         self.table.select_for_update_sql()
      } else {
         self.table.select_sql()
      };

      match client.fetch_one(&sql, vec![]).await {
         Ok(row) => match self.table.parse_row(row) {
            Ok(probe) => Ok(probe),
            Err(e) => {
               self.release_lock(client).await;
               Err(e)
            }
         },
         Err(e) if e.is_no_such_table() => {
            // Creation continues in the same session, autocommit stays off
            if self.config.concurrent_mode {
               self.rollback(client).await;
            }
            Ok(Probe::Missing)
         }
         Err(e) => {
            self.release_lock(client).await;
            Err(self.read_error(e))
         }
      }
   }

   /// Create the version table and claim it with the initialization marker.
   async fn create_table(&self, client: &mut P::Client) -> Result<CreateOutcome> {
      if let Err(e) = client.execute(&self.table.create_sql(), vec![]).await {
         if e.is_table_exists() {
            debug!("{} created concurrently: {}", self.table.name(), e);
            return Ok(CreateOutcome::AlreadyExists);
         }
         self.release_lock(client).await;
         return Err(self.create_error(e));
      }

      if let Err(e) = client.execute(&self.table.insert_marker_sql(), vec![]).await {
         self.release_lock(client).await;
         return Err(self.create_error(e));
      }

      if self.config.concurrent_mode {
         let locked = client
            .fetch_one(&self.table.select_for_update_sql(), vec![])
            .await;
         if let Err(e) = locked {
            self.release_lock(client).await;
            return Err(self.create_error(e));
         }
      }

      Ok(CreateOutcome::Created)
   }

   /// Run `on_init` and record the target version.
   ///
   /// In concurrent mode the callback gets its own connection so its DDL
   /// cannot commit the transaction that holds the version row lock.
   async fn initialize<H>(
      &self,
      client: &mut P::Client,
      target_version: i64,
      handler: &H,
   ) -> Result<()>
   where
      H: SchemaHandler + ?Sized,
   {
      let result = if self.config.concurrent_mode {
         let mut init_client = self.provider.get_client(None);
         if let Err(e) = init_client.open().await {
            self.release_lock(client).await;
            return Err(UpgradeError::Connection(e));
         }

         let result = handler.on_init(&mut init_client).await;

         if let Err(e) = init_client.close().await {
            warn!("Failed to close init client: {}", e);
         }
         result
      } else {
         handler.on_init(client).await
      };

      if let Err(source) = result {
         self.release_lock(client).await;
         return Err(UpgradeError::Callback {
            phase: Phase::Init,
            current: None,
            target: target_version,
            source,
         });
      }

      self.record_version(client, None, target_version).await
   }

   /// Write the new version and, in concurrent mode, commit it.
   async fn record_version(
      &self,
      client: &mut P::Client,
      current: Option<i64>,
      target_version: i64,
   ) -> Result<()> {
      let written = async {
         client
            .execute(&self.table.update_sql(), vec![json!(target_version)])
            .await?;
         if self.config.concurrent_mode {
            client.execute(COMMIT, vec![]).await?;
            client.execute(SET_AUTOCOMMIT_ON, vec![]).await?;
         }
         Ok::<(), sqlx_mysql_toolkit::Error>(())
      }
      .await;

      if let Err(source) = written {
         self.release_lock(client).await;
         return Err(UpgradeError::UpdateVersion {
            table: self.table.name().to_string(),
            current,
            target: target_version,
            source,
         });
      }
      Ok(())
   }

   /// Roll back and restore autocommit. No-op outside concurrent mode.
   async fn release_lock(&self, client: &mut P::Client) {
      if !self.config.concurrent_mode {
         return;
      }
      self.rollback(client).await;
      if let Err(e) = client.execute(SET_AUTOCOMMIT_ON, vec![]).await {
         warn!("Failed to restore autocommit: {}", e);
      }
   }

   async fn rollback(&self, client: &mut P::Client) {
      if let Err(e) = client.execute(ROLLBACK, vec![]).await {
         warn!("Rollback on {} failed: {}", self.table.name(), e);
      }
   }

   fn read_error(&self, source: sqlx_mysql_toolkit::Error) -> UpgradeError {
      UpgradeError::ReadVersion {
         table: self.table.name().to_string(),
         source,
      }
   }

   fn create_error(&self, source: sqlx_mysql_toolkit::Error) -> UpgradeError {
      UpgradeError::CreateTable {
         table: self.table.name().to_string(),
         source,
      }
   }
}
