//! Version table naming, statements and probe classification

use serde_json::Value as JsonValue;
use sqlx_mysql_toolkit::Row;

use crate::error::{Result, UpgradeError};

/// Name of the version table before any suffix.
pub const BASE_TABLE_NAME: &str = "_version";

/// Row value written while initialization is in progress.
pub const INITIALIZING: i64 = -1;

pub(crate) const SET_AUTOCOMMIT_OFF: &str = "SET AUTOCOMMIT=0";
pub(crate) const SET_AUTOCOMMIT_ON: &str = "SET AUTOCOMMIT=1";
pub(crate) const COMMIT: &str = "COMMIT";
pub(crate) const ROLLBACK: &str = "ROLLBACK";

/// Single-row table holding the applied schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTable {
   name: String,
}

impl VersionTable {
   /// `_version` followed by `suffix`.
   ///
   /// The name is spliced into statements, so the suffix may only contain
   /// ASCII letters, digits and underscores.
   pub fn new(suffix: Option<&str>) -> Result<Self> {
      let suffix = suffix.unwrap_or_default();
      if !suffix
         .chars()
         .all(|c| c.is_ascii_alphanumeric() || c == '_')
      {
         return Err(UpgradeError::InvalidTableName(format!(
            "{BASE_TABLE_NAME}{suffix}"
         )));
      }

      Ok(Self {
         name: format!("{BASE_TABLE_NAME}{suffix}"),
      })
   }

   pub fn name(&self) -> &str {
      &self.name
   }

   pub fn select_sql(&self) -> String {
      format!("select value from {}", self.name)
   }

   pub fn select_for_update_sql(&self) -> String {
      format!("select value from {} for update", self.name)
   }

   pub fn create_sql(&self) -> String {
      format!("create table {} (value INTEGER PRIMARY KEY)", self.name)
   }

   pub fn insert_marker_sql(&self) -> String {
      format!("insert into {} values ({INITIALIZING})", self.name)
   }

   /// Takes the new version as its only parameter.
   pub fn update_sql(&self) -> String {
      format!("update {} set value = ?", self.name)
   }

   /// Extract the version from a probe row.
   pub(crate) fn parse_row(&self, row: Option<Row>) -> Result<Probe> {
      let Some(row) = row else {
         return Ok(Probe::Empty);
      };

      match row.get("value") {
         Some(JsonValue::Number(n)) => n
            .as_i64()
            .map(Probe::Recorded)
            .ok_or_else(|| self.malformed(format!("version value {n} is not an integer"))),
         // DECIMAL-like columns decode as strings
         Some(JsonValue::String(s)) => s.parse().map(Probe::Recorded).map_err(|_| {
            self.malformed(format!("version value {s:?} is not an integer"))
         }),
         other => Err(self.malformed(format!("unexpected version value {other:?}"))),
      }
   }

   fn malformed(&self, message: String) -> UpgradeError {
      UpgradeError::ReadVersion {
         table: self.name.clone(),
         source: sqlx_mysql_toolkit::Error::Other(message),
      }
   }
}

/// Raw result of reading the version row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
   /// The table does not exist.
   Missing,
   /// The table exists but holds no row.
   Empty,
   Recorded(i64),
}

/// Where the database stands relative to the requested version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
   Uninitialized,
   /// Table without a row: a creator sits between `CREATE` and `INSERT`, or crashed there.
   Empty,
   /// The initialization marker (or any negative value) is recorded.
   StaleLock(i64),
   AtTarget,
   Behind(i64),
   Ahead(i64),
}

impl VersionState {
   pub fn classify(probe: Probe, target: i64) -> Self {
      match probe {
         Probe::Missing => VersionState::Uninitialized,
         Probe::Empty => VersionState::Empty,
         Probe::Recorded(v) if v < 0 => VersionState::StaleLock(v),
         Probe::Recorded(v) if v == target => VersionState::AtTarget,
         Probe::Recorded(v) if v < target => VersionState::Behind(v),
         Probe::Recorded(v) => VersionState::Ahead(v),
      }
   }
}
