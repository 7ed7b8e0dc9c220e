//! # tallykv-conn-mgr
//!
//! A minimal wrapper around SQLx that enforces the SQLite connection policy
//! the tallykv store relies on: concurrent read-only connections plus a
//! single exclusive write connection.
//!
//! ## Core Types
//!
//! - **[`KvDatabase`]**: Main database type with separate read and write connection pools
//! - **[`KvDatabaseConfig`]**: Configuration for pool sizing and lock-wait bounds
//! - **[`WriteGuard`]**: RAII guard ensuring exclusive write access
//! - **[`Error`]**: Error type for database operations
//!
//! ## Architecture
//!
//! - **Connection pooling**: Separate read-only pool and write pool with a max of 1 connection
//! - **Lazy WAL mode**: Write-Ahead Logging enabled automatically on first write
//! - **Exclusive writes**: Single-connection write pool enforces serialized write access
//! - **Concurrent reads**: Multiple readers can query simultaneously via the read pool
//! - **Bounded waits**: Writer acquisition and SQLite lock waits are time-limited,
//!   surfacing [`Error::WriterBusy`] instead of blocking indefinitely
//!
//! ## Usage
//!
//! ```no_run
//! use tallykv_conn_mgr::KvDatabase;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> tallykv_conn_mgr::Result<()> {
//!     // Connect returns Arc<KvDatabase>
//!     let db = KvDatabase::connect("example.db", None).await?;
//!
//!     // Multiple connects to the same path return the same instance
//!     let db2 = KvDatabase::connect("example.db", None).await?;
//!     assert!(Arc::ptr_eq(&db, &db2));
//!
//!     // Use read_pool() for read queries (concurrent reads)
//!     let rows = sqlx::query("SELECT * FROM entries")
//!         .fetch_all(db.read_pool()?)
//!         .await?;
//!
//!     // Acquire the writer for write queries (exclusive)
//!     // WAL mode is enabled automatically on first call
//!     let mut writer = db.acquire_writer().await?;
//!     sqlx::query("INSERT INTO entries (key, value) VALUES (?, ?)")
//!         .bind("k")
//!         .bind(1_i64)
//!         .execute(&mut *writer)
//!         .await?;
//!
//!     // Close when done
//!     db.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Principles
//!
//! - Uses sqlx's `SqlitePoolOptions` for all pool configuration
//! - Uses sqlx's `SqliteConnectOptions` for connection flags and configuration
//! - Minimal custom logic - delegates to sqlx wherever possible
//! - Global registry caches new database instances and returns existing ones
//! - WAL mode is enabled lazily only when writes are needed
//!
mod config;
mod database;
mod error;
mod registry;
mod write_guard;

// Re-export public types
pub use config::KvDatabaseConfig;
pub use database::KvDatabase;
pub use error::Error;
pub use write_guard::WriteGuard;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
