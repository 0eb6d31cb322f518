use std::fmt;

/// Result type alias for upgrade coordinator operations.
pub type Result<T> = std::result::Result<T, UpgradeError>;

/// Error returned by a schema callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Process exit status for each fatal category.
pub mod exit_code {
   pub const CREATE_TABLE: i32 = 90;
   pub const STALE_LOCK: i32 = 91;
   pub const READ_VERSION: i32 = 92;
   pub const TARGET_UNREACHABLE: i32 = 93;
   pub const UPDATE_VERSION: i32 = 94;
   pub const INVALID_TARGET_VERSION: i32 = 95;
   pub const CALLBACK: i32 = 96;
   pub const INVALID_TABLE_NAME: i32 = 97;
   pub const CONNECTION: i32 = 98;
   pub const SERVER_VERSION: i32 = 99;
}

/// Which schema callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
   Init,
   Upgrade,
}

impl fmt::Display for Phase {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Phase::Init => f.write_str("init"),
         Phase::Upgrade => f.write_str("upgrade"),
      }
   }
}

/// Fatal outcomes of a schema check.
///
/// Every variant maps to a distinct [`exit_code`](UpgradeError::exit_code) so a
/// supervisor can tell a stale initialization marker from a lost database.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
   /// No client could be opened.
   #[error("unable to open a database client: {0}")]
   Connection(#[source] sqlx_mysql_toolkit::Error),

   /// The server version probe failed.
   #[error("unable to read server version: {0}")]
   ServerVersion(#[source] sqlx_mysql_toolkit::Error),

   /// The version row could not be read.
   #[error("unable to read version from {table}: {source}")]
   ReadVersion {
      table: String,
      source: sqlx_mysql_toolkit::Error,
   },

   /// The version table could not be created or seeded.
   #[error("unable to create version table {table}: {source}")]
   CreateTable {
      table: String,
      source: sqlx_mysql_toolkit::Error,
   },

   /// The version table holds the initialization marker, or no row at all.
   #[error("{table} is left in initialization state (value {value:?}); initialization crashed or is still running elsewhere")]
   StaleLock { table: String, value: Option<i64> },

   /// The recorded version is newer than the one requested.
   #[error("recorded version {current} is ahead of target version {target}")]
   TargetUnreachable { current: i64, target: i64 },

   /// A schema callback failed. The transaction was rolled back.
   #[error("{phase} callback failed (current version {current:?}, target {target}): {source}")]
   Callback {
      phase: Phase,
      current: Option<i64>,
      target: i64,
      source: CallbackError,
   },

   /// The final version write or commit failed.
   #[error("unable to record version {target} in {table} (current version {current:?}): {source}")]
   UpdateVersion {
      table: String,
      current: Option<i64>,
      target: i64,
      source: sqlx_mysql_toolkit::Error,
   },

   /// Versions must be positive; `0` and below are never recorded.
   #[error("target version must be positive, got {0}")]
   InvalidTargetVersion(i64),

   /// The version table suffix is not a plain identifier.
   #[error("invalid version table name: {0}")]
   InvalidTableName(String),
}

impl UpgradeError {
   /// Process exit status for this failure.
   pub fn exit_code(&self) -> i32 {
      match self {
         UpgradeError::Connection(_) => exit_code::CONNECTION,
         UpgradeError::ServerVersion(_) => exit_code::SERVER_VERSION,
         UpgradeError::ReadVersion { .. } => exit_code::READ_VERSION,
         UpgradeError::CreateTable { .. } => exit_code::CREATE_TABLE,
         UpgradeError::StaleLock { .. } => exit_code::STALE_LOCK,
         UpgradeError::TargetUnreachable { .. } => exit_code::TARGET_UNREACHABLE,
         UpgradeError::Callback { .. } => exit_code::CALLBACK,
         UpgradeError::UpdateVersion { .. } => exit_code::UPDATE_VERSION,
         UpgradeError::InvalidTableName(_) => exit_code::INVALID_TABLE_NAME,
         UpgradeError::InvalidTargetVersion(_) => exit_code::INVALID_TARGET_VERSION,
      }
   }

   /// Machine-readable code of the underlying database error, if any.
   pub fn error_code(&self) -> String {
      match self {
         UpgradeError::Connection(e)
         | UpgradeError::ServerVersion(e)
         | UpgradeError::ReadVersion { source: e, .. }
         | UpgradeError::CreateTable { source: e, .. }
         | UpgradeError::UpdateVersion { source: e, .. } => e.error_code(),
         UpgradeError::StaleLock { .. } => "STALE_LOCK".to_string(),
         UpgradeError::TargetUnreachable { .. } => "TARGET_UNREACHABLE".to_string(),
         UpgradeError::Callback { .. } => "CALLBACK_ERROR".to_string(),
         UpgradeError::InvalidTableName(_) => "INVALID_TABLE_NAME".to_string(),
         UpgradeError::InvalidTargetVersion(_) => "INVALID_TARGET_VERSION".to_string(),
      }
   }

   /// Version recorded in the table when the check failed, when it was read.
   ///
   /// `None` if the failure came before the row was read, or if the table
   /// held no committed version yet.
   pub fn current_version(&self) -> Option<i64> {
      match self {
         UpgradeError::StaleLock { value, .. } => *value,
         UpgradeError::TargetUnreachable { current, .. } => Some(*current),
         UpgradeError::Callback { current, .. } | UpgradeError::UpdateVersion { current, .. } => {
            *current
         }
         _ => None,
      }
   }
}
