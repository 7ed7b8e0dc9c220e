//! SQLite database with connection pooling and exclusive write access

use crate::Result;
use crate::config::KvDatabaseConfig;
use crate::error::Error;
use crate::registry::{get_or_open_database, is_memory_database, uncache_database};
use crate::write_guard::WriteGuard;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{ConnectOptions, Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// SQLite database with connection pooling for concurrent reads and bounded exclusive writes.
///
/// Once the database is opened it can be used for read-only operations by calling `read_pool()`.
/// Write operations are available by calling `acquire_writer()` which lazily initializes WAL mode
/// on first use. Writer acquisition waits at most `writer_acquire_timeout_ms` before failing
/// with [`Error::WriterBusy`], so callers contending for the writer never block indefinitely.
///
/// # Example
///
/// ```no_run
/// use tallykv_conn_mgr::KvDatabase;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), tallykv_conn_mgr::Error> {
/// let db = KvDatabase::connect("test.db", None).await?;
///
/// // Use read_pool for SELECT queries (concurrent reads)
/// let rows = sqlx::query("SELECT * FROM entries")
///     .fetch_all(db.read_pool()?)
///     .await?;
///
/// // Acquire writer for INSERT/UPDATE/DELETE (exclusive)
/// let mut writer = db.acquire_writer().await?;
/// sqlx::query("INSERT INTO entries (key, value) VALUES (?, ?)")
///     .bind("k")
///     .bind(1_i64)
///     .execute(&mut *writer)
///     .await?;
///
/// db.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct KvDatabase {
   /// Pool of read-only connections (defaults to max_connections=6) for concurrent reads
   read_pool: Pool<Sqlite>,

   /// Single read-write connection pool (max_connections=1) for serialized writes
   write_conn: Pool<Sqlite>,

   /// Tracks if WAL mode has been initialized (set on first write)
   wal_initialized: AtomicBool,

   /// Marks database as closed to prevent further operations
   closed: AtomicBool,

   /// Path to database file (used for cleanup and registry lookups)
   path: PathBuf,
}

impl KvDatabase {
   /// Connect to a SQLite database
   ///
   /// If the database is already connected, returns the existing instance.
   /// Multiple calls with the same path will return the same database instance.
   ///
   /// The database is created if it doesn't exist. WAL mode is enabled when
   /// `acquire_writer()` is first called. Every connection carries the configured
   /// SQLite busy timeout, bounding lock waits against other processes.
   ///
   /// # Arguments
   ///
   /// * `path` - Path to the SQLite database file (will be created if missing)
   /// * `custom_config` - Optional custom configuration for connection pools and
   ///   lock-wait bounds. Pass `None` to use the defaults documented on
   ///   [`KvDatabaseConfig`].
   ///
   /// # Example
   ///
   /// ```no_run
   /// use tallykv_conn_mgr::{KvDatabase, KvDatabaseConfig};
   ///
   /// # async fn example() -> Result<(), tallykv_conn_mgr::Error> {
   /// // Connect with default configuration (recommended for most use cases)
   /// let db = KvDatabase::connect("test.db", None).await?;
   ///
   /// // Or customize when the defaults don't meet your requirements
   /// let config = KvDatabaseConfig {
   ///    writer_acquire_timeout_ms: 250,
   ///    ..Default::default()
   /// };
   /// let db = KvDatabase::connect("other.db", Some(config)).await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn connect(
      path: impl AsRef<Path>,
      custom_config: Option<KvDatabaseConfig>,
   ) -> Result<Arc<Self>> {
      let config = custom_config.unwrap_or_default();
      let path = path.as_ref();

      // Validate path is not empty
      if path.as_os_str().is_empty() {
         return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Database path cannot be empty",
         )));
      }

      let path = path.to_path_buf();

      get_or_open_database(&path, || async {
         // Check if database file exists
         let db_exists = path.exists();

         // If database doesn't exist and not :memory:, create it with a temporary connection.
         // We don't keep this connection - WAL mode will be set later in acquire_writer().
         //
         // Why do we need to manually create the database file? We could just let the connection
         // create it if it doesn't exist, using `create_if_missing(true)`, right? Not if we called
         // connect and then our very first query was a read-only query. That would fail because
         // the read pool connections are read-only and cannot create the file
         if !db_exists && !is_memory_database(&path) {
            let create_options = SqliteConnectOptions::new()
               .filename(&path)
               .create_if_missing(true)
               .read_only(false);

            // Create database file with a temporary connection
            let conn = create_options.connect().await?;
            drop(conn); // Close immediately after creating the file
         }

         let busy_timeout = Duration::from_millis(config.busy_timeout_ms);

         // Create read pool with read-only connections
         let read_options = SqliteConnectOptions::new()
            .filename(&path)
            .read_only(true)
            .busy_timeout(busy_timeout);

         let read_pool = SqlitePoolOptions::new()
            .max_connections(config.max_read_connections)
            .min_connections(0)
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect_with(read_options)
            .await?;

         // Create write pool with a single read-write connection. The acquire
         // timeout is the bounded wait for the exclusive writer.
         let write_options = SqliteConnectOptions::new()
            .filename(&path)
            .read_only(false)
            .busy_timeout(busy_timeout);

         let write_conn = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .acquire_timeout(Duration::from_millis(config.writer_acquire_timeout_ms))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect_with(write_options)
            .await?;

         debug!("opened database at {}", path.display());

         Ok(Self {
            read_pool,
            write_conn,
            wal_initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            path: path.clone(),
         })
      })
      .await
   }

   /// Get a reference to the connection pool for executing read queries
   ///
   /// Use this for concurrent read operations. Multiple readers can access
   /// the pool simultaneously.
   pub fn read_pool(&self) -> Result<&Pool<Sqlite>> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::DatabaseClosed);
      }
      Ok(&self.read_pool)
   }

   /// Acquire exclusive write access to the database
   ///
   /// This method returns a `WriteGuard` that provides exclusive access to
   /// the single write connection. Only one writer can exist at a time; a
   /// second caller waits at most the configured acquire timeout and then
   /// receives [`Error::WriterBusy`].
   ///
   /// On the first call, this method will enable WAL mode on the database.
   /// Subsequent calls reuse the same write connection.
   pub async fn acquire_writer(&self) -> Result<WriteGuard> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::DatabaseClosed);
      }

      // Acquire connection from pool (max=1 ensures exclusive access)
      let mut conn = self.write_conn.acquire().await.map_err(|e| match e {
         sqlx::Error::PoolTimedOut => Error::WriterBusy,
         other => Error::Sqlx(other),
      })?;

      // Initialize WAL mode on first use (idempotent and safe)
      if !self.wal_initialized.load(Ordering::SeqCst) {
         sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *conn)
            .await?;

         // https://www.sqlite.org/wal.html#performance_considerations
         sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&mut *conn)
            .await?;

         self.wal_initialized.store(true, Ordering::SeqCst);
      }

      // Return WriteGuard wrapping the pool connection
      Ok(WriteGuard::new(conn))
   }

   /// Close the database and clean up resources
   ///
   /// This closes all connections in the pool and removes the database from the cache.
   /// After calling close, any operations on this database will return `Error::DatabaseClosed`.
   ///
   /// Note: Takes `Arc<Self>` to consume ownership, preventing use-after-close at compile time.
   /// The registry stores `Weak` references, so when this Arc is dropped, the database is freed.
   pub async fn close(self: Arc<Self>) -> Result<()> {
      // Mark as closed
      self.closed.store(true, Ordering::SeqCst);

      // Remove from registry
      uncache_database(&self.path).await;

      // This will await all readers to be returned
      self.read_pool.close().await;

      // Checkpoint WAL before closing the write connection to flush changes and truncate WAL file
      // Only attempt if WAL was initialized (write connection was used)
      if self.wal_initialized.load(Ordering::SeqCst)
         && let Ok(mut conn) = self.write_conn.acquire().await
      {
         let _ = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&mut *conn)
            .await;
      }

      self.write_conn.close().await;

      debug!("closed database at {}", self.path.display());

      Ok(())
   }

   /// Close the database and delete all database files
   ///
   /// This closes all connections and then deletes the database file,
   /// WAL file, and SHM file from disk. Use with caution!
   ///
   /// Note: Takes `Arc<Self>` to consume ownership, preventing use-after-close at compile time.
   pub async fn remove(self: Arc<Self>) -> Result<()> {
      // Clone path before closing (since close consumes self)
      let path = self.path.clone();

      // Close all connections and clean up
      self.close().await?;

      // Remove main database file - propagate errors (file should exist)
      std::fs::remove_file(&path).map_err(Error::Io)?;

      // Remove WAL and SHM files - ignore "not found" but propagate other errors
      // (these files may not exist if WAL was never initialized)
      let wal_path = path.with_extension("db-wal");
      if let Err(e) = std::fs::remove_file(&wal_path)
         && e.kind() != std::io::ErrorKind::NotFound
      {
         return Err(Error::Io(e));
      }

      let shm_path = path.with_extension("db-shm");
      if let Err(e) = std::fs::remove_file(&shm_path)
         && e.kind() != std::io::ErrorKind::NotFound
      {
         return Err(Error::Io(e));
      }

      Ok(())
   }
}
