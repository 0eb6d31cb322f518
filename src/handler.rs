use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx_mysql_toolkit::DatabaseClient;

use crate::error::CallbackError;

/// Result of a schema callback.
pub type CallbackResult = std::result::Result<(), CallbackError>;

/// Caller-supplied schema changes.
///
/// Both methods receive an open client and must finish all of their DDL/DML
/// before returning: the coordinator records the new version right after.
/// A failed or interrupted upgrade leaves the previous version recorded, so
/// the same call is repeated on the next check. Write both methods to be
/// safely re-runnable.
///
/// In concurrent mode `on_init` runs on a separate connection while the
/// version row lock is held elsewhere, whereas `on_upgrade` runs inside the
/// locking transaction. On MySQL, DDL commits implicitly, which releases that
/// lock early; keep `on_upgrade` to DML when several instances may race.
#[async_trait]
pub trait SchemaHandler: Send + Sync {
   /// Create the schema from nothing.
   async fn on_init(&self, client: &mut dyn DatabaseClient) -> CallbackResult;

   /// Bring the schema from `from_version` to the target version.
   async fn on_upgrade(
      &self,
      client: &mut dyn DatabaseClient,
      from_version: i64,
   ) -> CallbackResult;
}

/// [`SchemaHandler`] built from two closures.
///
/// ```no_run
/// use mysql_upgrade_manager::{CallbackError, Callbacks};
///
/// let handler = Callbacks::new(
///    |client| {
///       Box::pin(async move {
///          client
///             .execute("CREATE TABLE users (id INTEGER PRIMARY KEY)", vec![])
///             .await?;
///          Ok::<(), CallbackError>(())
///       })
///    },
///    |_client, _from_version| Box::pin(async move { Ok(()) }),
/// );
/// ```
pub struct Callbacks<I, U> {
   on_init: I,
   on_upgrade: U,
}

impl<I, U> Callbacks<I, U>
where
   I: for<'c> Fn(&'c mut dyn DatabaseClient) -> BoxFuture<'c, CallbackResult> + Send + Sync,
   U: for<'c> Fn(&'c mut dyn DatabaseClient, i64) -> BoxFuture<'c, CallbackResult> + Send + Sync,
{
   pub fn new(on_init: I, on_upgrade: U) -> Self {
      Self {
         on_init,
         on_upgrade,
      }
   }
}

#[async_trait]
impl<I, U> SchemaHandler for Callbacks<I, U>
where
   I: for<'c> Fn(&'c mut dyn DatabaseClient) -> BoxFuture<'c, CallbackResult> + Send + Sync,
   U: for<'c> Fn(&'c mut dyn DatabaseClient, i64) -> BoxFuture<'c, CallbackResult> + Send + Sync,
{
   async fn on_init(&self, client: &mut dyn DatabaseClient) -> CallbackResult {
      (self.on_init)(client).await
   }

   async fn on_upgrade(
      &self,
      client: &mut dyn DatabaseClient,
      from_version: i64,
   ) -> CallbackResult {
      (self.on_upgrade)(client, from_version).await
   }
}
