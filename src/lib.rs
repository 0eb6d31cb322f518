//! Schema version gate for MySQL/MariaDB services.
//!
//! [`UpgradeManager`] keeps the applied schema version in a single-row table
//! (`_version`, optionally suffixed) and, given a target version, runs exactly
//! one of two caller-supplied callbacks:
//!
//! - `on_init` when the table does not exist yet
//! - `on_upgrade` when the recorded version is behind the target
//!
//! In concurrent mode the version row is read with `SELECT ... FOR UPDATE` so
//! that, among instances starting together, one does the work while the
//! others block, then observe the new version and do nothing.
//!
//! Failures are fatal: [`UpgradeManager::check_schema_or_exit`] (or
//! [`check_schema_with_or_exit`](UpgradeManager::check_schema_with_or_exit))
//! logs them and exits with [`UpgradeError::exit_code`].
//!
//! Connections come from any [`ConnectionProvider`]; the
//! [`DatabaseWrapper`](sqlx_mysql_toolkit::DatabaseWrapper) from
//! `sqlx-mysql-toolkit` covers single servers and rw/ro clusters.

mod config;
mod error;
mod handler;
mod manager;
mod version_table;

pub use config::{DEFAULT_RACE_RETRY_DELAY_MS, UpgradeConfig};
pub use error::{CallbackError, Phase, Result, UpgradeError, exit_code};
pub use handler::{CallbackResult, Callbacks, SchemaHandler};
pub use manager::{CheckOutcome, UpgradeManager};
pub use version_table::{BASE_TABLE_NAME, INITIALIZING, Probe, VersionState, VersionTable};

// Re-export the capability traits callbacks are written against
pub use sqlx_mysql_toolkit::{ConnectionProvider, DatabaseClient, async_trait};
