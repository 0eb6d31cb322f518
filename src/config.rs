use serde::{Deserialize, Serialize};

/// Default pause before re-probing after losing the version table creation race.
pub const DEFAULT_RACE_RETRY_DELAY_MS: u64 = 2000;

/// Upgrade coordinator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
   /// Serialize concurrent instances through a row lock on the version table.
   ///
   /// When false, the caller guarantees that only one process checks the
   /// schema at a time.
   pub concurrent_mode: bool,

   /// Appended to `_version`, so several coordinators can share one database.
   pub version_table_suffix: Option<String>,

   pub race_retry_delay_ms: u64,

   /// How often a version table without a row is re-probed (concurrent mode)
   /// before it is reported as a stale lock.
   pub max_empty_table_retries: u32,
}

impl Default for UpgradeConfig {
   fn default() -> Self {
      Self {
         concurrent_mode: false,
         version_table_suffix: None,
         race_retry_delay_ms: DEFAULT_RACE_RETRY_DELAY_MS,
         max_empty_table_retries: 5,
      }
   }
}

impl UpgradeConfig {
   /// Defaults with concurrent mode switched on.
   pub fn concurrent() -> Self {
      Self {
         concurrent_mode: true,
         ..Self::default()
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_defaults() {
      let config = UpgradeConfig::default();
      assert!(!config.concurrent_mode);
      assert_eq!(config.version_table_suffix, None);
      assert_eq!(config.race_retry_delay_ms, 2000);
      assert_eq!(config.max_empty_table_retries, 5);
      assert!(UpgradeConfig::concurrent().concurrent_mode);
   }

   #[test]
   fn test_partial_deserialize() {
      let config: UpgradeConfig =
         serde_json::from_str(r#"{"concurrent_mode": true, "version_table_suffix": "_billing"}"#)
            .unwrap();
      assert!(config.concurrent_mode);
      assert_eq!(config.version_table_suffix.as_deref(), Some("_billing"));
      assert_eq!(config.race_retry_delay_ms, DEFAULT_RACE_RETRY_DELAY_MS);
   }
}
