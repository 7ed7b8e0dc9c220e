//! Durable, unique-keyed entry storage over the SQLite connection manager.

use std::path::Path;
use std::sync::Arc;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use tallykv_conn_mgr::{KvDatabase, KvDatabaseConfig};

use crate::error::{Error, Result};
use crate::value::{Entry, Value, decode_value};

/// Entries live in a `STRICT` table so the `ANY` column preserves the bound
/// SQLite type exactly; key uniqueness is the primary-key constraint.
const CREATE_ENTRIES_SQL: &str = "CREATE TABLE IF NOT EXISTS entries ( \
                                  key TEXT PRIMARY KEY, \
                                  value ANY, \
                                  last_updated INTEGER \
                                  ) STRICT";

const SELECT_ENTRY_SQL: &str = "SELECT key, value, last_updated FROM entries WHERE key = ?";
const INSERT_ENTRY_SQL: &str = "INSERT INTO entries (key, value, last_updated) VALUES (?, ?, ?)";
const UPDATE_ENTRY_SQL: &str = "UPDATE entries SET value = ?, last_updated = ? WHERE key = ?";

/// Outcome of a unique-constrained insert.
///
/// A key collision is an expected, recoverable outcome that callers branch
/// on, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
   /// The entry was created; the key was previously absent.
   Inserted,

   /// The key already exists. Carries the entry that blocked the insert;
   /// nothing was written.
   Conflict(Entry),
}

/// Durable mapping from string key to [`Entry`], backed by a unique-key
/// constraint in SQLite.
///
/// The store exclusively owns all entries: callers never hold mutable
/// references into it, and every mutation goes through [`KvStore::insert`],
/// [`KvStore::replace`], or the upsert engine. The database handle is
/// constructor-injected so the store composes with shared instances and
/// stays testable in isolation.
#[derive(Clone)]
pub struct KvStore {
   db: Arc<KvDatabase>,
}

impl KvStore {
   /// Open a store at the given path, creating the database file and the
   /// entries table if they don't exist.
   ///
   /// # Example
   ///
   /// ```no_run
   /// use tallykv::KvStore;
   ///
   /// # async fn example() -> tallykv::Result<()> {
   /// let store = KvStore::open("counters.db", None).await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn open(
      path: impl AsRef<Path>,
      custom_config: Option<KvDatabaseConfig>,
   ) -> Result<Self> {
      let db = KvDatabase::connect(path, custom_config).await?;
      Self::with_database(db).await
   }

   /// Build a store over an already-connected database handle.
   ///
   /// Ensures the entries table exists. Use this to share one [`KvDatabase`]
   /// between the store and other tables.
   pub async fn with_database(db: Arc<KvDatabase>) -> Result<Self> {
      let mut writer = db.acquire_writer().await?;
      sqlx::query(CREATE_ENTRIES_SQL)
         .execute(&mut *writer)
         .await?;
      drop(writer);

      Ok(Self { db })
   }

   /// The underlying database handle.
   pub fn database(&self) -> &Arc<KvDatabase> {
      &self.db
   }

   /// Point lookup with no side effects.
   ///
   /// An absent key is `Ok(None)`, not an error.
   pub async fn get(&self, key: &str) -> Result<Option<Entry>> {
      let row = sqlx::query(SELECT_ENTRY_SQL)
         .bind(key)
         .fetch_optional(self.db.read_pool().map_err(Error::from)?)
         .await?;

      row.map(entry_from_row).transpose()
   }

   /// Unique-constrained insert.
   ///
   /// Fails softly with [`InsertOutcome::Conflict`] when the key already
   /// exists; the existing entry is never overwritten by this operation.
   pub async fn insert(
      &self,
      key: &str,
      value: Value,
      last_updated: Option<i64>,
   ) -> Result<InsertOutcome> {
      let mut writer = self.db.acquire_writer().await?;
      insert_entry(&mut *writer, key, &value, last_updated).await
   }

   /// Unconditionally overwrite the entry for an existing key.
   ///
   /// Fails with [`Error::NotFound`] if the key is absent; replace never
   /// creates entries.
   pub async fn replace(&self, key: &str, value: Value, last_updated: Option<i64>) -> Result<()> {
      let mut writer = self.db.acquire_writer().await?;
      let updated = update_entry(&mut *writer, key, &value, last_updated).await?;

      if !updated {
         return Err(Error::NotFound(key.to_string()));
      }

      Ok(())
   }

   /// Close the store, checkpointing the WAL and releasing all connections.
   pub async fn close(self) -> Result<()> {
      self.db.close().await?;
      Ok(())
   }

   /// Close the store and delete the database files from disk.
   pub async fn remove(self) -> Result<()> {
      self.db.remove().await?;
      Ok(())
   }
}

/// Connection-scoped point lookup, composable inside a transaction.
pub(crate) async fn fetch_entry(
   conn: &mut SqliteConnection,
   key: &str,
) -> Result<Option<Entry>> {
   let row = sqlx::query(SELECT_ENTRY_SQL)
      .bind(key)
      .fetch_optional(conn)
      .await?;

   row.map(entry_from_row).transpose()
}

/// Connection-scoped unique-constrained insert.
///
/// A primary-key violation is caught and resolved into
/// [`InsertOutcome::Conflict`] carrying the entry that blocked the insert.
pub(crate) async fn insert_entry(
   conn: &mut SqliteConnection,
   key: &str,
   value: &Value,
   last_updated: Option<i64>,
) -> Result<InsertOutcome> {
   let result = bind_value(sqlx::query(INSERT_ENTRY_SQL).bind(key), value)
      .bind(last_updated)
      .execute(&mut *conn)
      .await;

   match result {
      Ok(_) => Ok(InsertOutcome::Inserted),
      Err(e) if is_unique_violation(&e) => match fetch_entry(conn, key).await? {
         Some(existing) => Ok(InsertOutcome::Conflict(existing)),
         // The conflicting row was deleted by another process between the
         // constraint failure and our lookup. Transient; the caller retries.
         None => Err(Error::Busy),
      },
      Err(e) => Err(e.into()),
   }
}

/// Connection-scoped unconditional update. Returns false when no row matched.
pub(crate) async fn update_entry(
   conn: &mut SqliteConnection,
   key: &str,
   value: &Value,
   last_updated: Option<i64>,
) -> Result<bool> {
   let result = bind_value(sqlx::query(UPDATE_ENTRY_SQL), value)
      .bind(last_updated)
      .bind(key)
      .execute(conn)
      .await?;

   Ok(result.rows_affected() > 0)
}

/// Bind a [`Value`] as its native SQLite type.
fn bind_value<'a>(
   query: sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>>,
   value: &Value,
) -> sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>> {
   match value {
      Value::Null => query.bind(None::<i64>),
      Value::Text(s) => query.bind(s.clone()),
      Value::Integer(n) => query.bind(*n),
   }
}

fn entry_from_row(row: SqliteRow) -> Result<Entry> {
   let key: String = row.try_get("key")?;
   let value = decode_value(row.try_get_raw("value")?)?;
   let last_updated: Option<i64> = row.try_get("last_updated")?;

   Ok(Entry {
      key,
      value,
      last_updated,
   })
}

/// SQLite reports primary-key collisions as constraint violations;
/// 1555 = SQLITE_CONSTRAINT_PRIMARYKEY, 2067 = SQLITE_CONSTRAINT_UNIQUE.
fn is_unique_violation(e: &sqlx::Error) -> bool {
   e.as_database_error().is_some_and(|db_err| {
      db_err
         .code()
         .map(|code| code == "1555" || code == "2067")
         .unwrap_or(false)
         || db_err.message().contains("UNIQUE constraint failed")
   })
}
