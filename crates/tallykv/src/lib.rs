//! Embedded key-value store with atomic upsert counters, backed by SQLite.
//!
//! This crate sits on top of the connection manager (`tallykv-conn-mgr`)
//! and provides:
//!
//! - [`KvStore`] — durable, unique-keyed mapping from string keys to tagged
//!   values (`Null` / `Text` / `Integer`)
//! - [`UpsertEngine`] — insert-or-update resolved atomically per key, with
//!   conflict policies (`DoNothing` / `DoUpdate`), merge strategies
//!   (`Replace` / `Increment`), and optional conflict predicates
//! - [`predicates`] — deterministic guards for conditional updates
//!
//! Every `apply` runs as one transaction on a single exclusive write
//! connection, so concurrent increments on the same key compose instead of
//! losing updates.
//!
//! # Example
//!
//! ```no_run
//! use tallykv::{ConflictPolicy, KvStore, Merge, UpsertEngine, UpsertRequest};
//!
//! # async fn example() -> tallykv::Result<()> {
//! let store = KvStore::open("counters.db", None).await?;
//! let engine = UpsertEngine::new(store);
//!
//! // First call inserts, later calls add to the stored counter
//! engine
//!    .apply(UpsertRequest::new("visits", 1_i64).merge(Merge::Increment))
//!    .await?;
//!
//! // Insert-if-absent: an existing value wins
//! engine
//!    .apply(UpsertRequest::new("city", "Boston").policy(ConflictPolicy::DoNothing))
//!    .await?;
//!
//! let entry = engine.store().get("visits").await?;
//! println!("{:?}", entry);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod predicate;
pub mod store;
pub mod value;

pub use engine::{ConflictPolicy, Merge, UpsertEngine, UpsertOutcome, UpsertRequest};
pub use error::{Error, PredicateError, Result};
pub use predicate::{ConflictPredicate, Incoming};
pub use store::{InsertOutcome, KvStore};
pub use value::{Entry, Value};

/// Built-in conflict predicates.
pub mod predicates {
   pub use crate::predicate::{always, last_updated_newer};
}

// Re-export commonly used types from the connection manager
pub use tallykv_conn_mgr::{KvDatabase, KvDatabaseConfig};
