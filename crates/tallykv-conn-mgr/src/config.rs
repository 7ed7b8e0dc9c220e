//! Configuration for SQLite database connection pools

use serde::{Deserialize, Serialize};

/// Configuration for KvDatabase connection pools and lock-wait bounds
///
/// # Examples
///
/// ```
/// use tallykv_conn_mgr::KvDatabaseConfig;
///
/// // Use defaults
/// let config = KvDatabaseConfig::default();
///
/// // Customize specific fields
/// let config = KvDatabaseConfig {
///     max_read_connections: 3,
///     idle_timeout_secs: 60,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvDatabaseConfig {
   /// Maximum number of concurrent read connections
   ///
   /// This controls the size of the read-only connection pool.
   /// Higher values allow more concurrent read queries but consume more resources.
   ///
   /// Default: 6
   pub max_read_connections: u32,

   /// Idle timeout for both read and write connections (in seconds)
   ///
   /// Connections that remain idle for this duration will be closed automatically.
   /// This helps prevent resource exhaustion from idle threads.
   ///
   /// Default: 30
   pub idle_timeout_secs: u64,

   /// SQLite busy timeout applied to every connection (in milliseconds)
   ///
   /// Bounds how long SQLite waits for a file lock held by another process
   /// before returning `SQLITE_BUSY`.
   ///
   /// Default: 5000
   pub busy_timeout_ms: u64,

   /// Maximum time to wait for the exclusive write connection (in milliseconds)
   ///
   /// `acquire_writer()` fails with [`crate::Error::WriterBusy`] once this
   /// bound is exceeded, so callers never block indefinitely on a writer
   /// held by another task.
   ///
   /// Default: 5000
   pub writer_acquire_timeout_ms: u64,
}

impl Default for KvDatabaseConfig {
   fn default() -> Self {
      Self {
         max_read_connections: 6,
         idle_timeout_secs: 30,
         busy_timeout_ms: 5000,
         writer_acquire_timeout_ms: 5000,
      }
   }
}
