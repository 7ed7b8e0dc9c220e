/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned when a conflict predicate cannot be evaluated
///
/// Predicates are pure functions, but the data they compare may be malformed
/// for the comparison they perform (e.g. a timestamp missing on one side).
/// Evaluation failure is recoverable: the engine leaves the entry unchanged
/// and surfaces this as [`Error::Predicate`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PredicateError(String);

impl PredicateError {
   pub fn new(message: impl Into<String>) -> Self {
      Self(message.into())
   }
}

/// Error types for store and upsert operations.
///
/// An insert hitting an existing key is NOT represented here: key conflicts
/// are expected outcomes that drive branching, surfaced as
/// [`crate::InsertOutcome::Conflict`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(sqlx::Error),

   /// Error from the connection manager.
   #[error(transparent)]
   ConnectionManager(tallykv_conn_mgr::Error),

   /// No entry exists for the given key.
   #[error("no entry for key: {0}")]
   NotFound(String),

   /// Merge arithmetic requires value types that the stored or incoming value does not have.
   #[error("type mismatch: cannot merge incoming {incoming} into existing {existing}")]
   TypeMismatch {
      existing: &'static str,
      incoming: &'static str,
   },

   /// Incrementing the stored counter would overflow a 64-bit integer.
   #[error("integer overflow while merging counter value")]
   CounterOverflow,

   /// The conflict predicate could not be evaluated; the entry is unchanged.
   #[error("predicate evaluation failed: {0}")]
   Predicate(#[from] PredicateError),

   /// The database is locked or the writer is contended. Transient; callers
   /// may retry with backoff.
   #[error("database is busy, retry the operation")]
   Busy,

   /// The backing store cannot serve the request (e.g. it has been closed).
   /// Fatal for the current attempt; not retried by the engine.
   #[error("backing store unavailable: {0}")]
   Unavailable(String),

   /// A stored value has a SQLite type outside the supported tagged union.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("SQLITE_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
         Error::ConnectionManager(_) => "CONNECTION_ERROR".to_string(),
         Error::NotFound(_) => "NOT_FOUND".to_string(),
         Error::TypeMismatch { .. } => "TYPE_MISMATCH".to_string(),
         Error::CounterOverflow => "COUNTER_OVERFLOW".to_string(),
         Error::Predicate(_) => "PREDICATE_ERROR".to_string(),
         Error::Busy => "BUSY".to_string(),
         Error::Unavailable(_) => "UNAVAILABLE".to_string(),
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE".to_string(),
      }
   }

   /// True for transient errors where the caller may retry the operation.
   pub fn is_retryable(&self) -> bool {
      matches!(self, Error::Busy)
   }
}

/// SQLite result codes that signal lock contention rather than failure.
/// 5 = SQLITE_BUSY, 6 = SQLITE_LOCKED; 261 and 517 are their extended
/// WAL-snapshot variants.
const BUSY_CODES: [&str; 4] = ["5", "6", "261", "517"];

fn is_busy(db_err: &dyn sqlx::error::DatabaseError) -> bool {
   db_err
      .code()
      .map(|code| BUSY_CODES.contains(&code.as_ref()))
      .unwrap_or(false)
      || db_err.message().contains("database is locked")
}

impl From<sqlx::Error> for Error {
   fn from(e: sqlx::Error) -> Self {
      match e {
         sqlx::Error::PoolTimedOut => Error::Busy,
         sqlx::Error::PoolClosed => Error::Unavailable("connection pool closed".into()),
         other => {
            if other.as_database_error().is_some_and(is_busy) {
               Error::Busy
            } else {
               Error::Sqlx(other)
            }
         }
      }
   }
}

impl From<tallykv_conn_mgr::Error> for Error {
   fn from(e: tallykv_conn_mgr::Error) -> Self {
      use tallykv_conn_mgr::Error as ConnError;

      match e {
         ConnError::WriterBusy => Error::Busy,
         ConnError::DatabaseClosed => Error::Unavailable("database has been closed".into()),
         ConnError::Sqlx(e) => Error::from(e),
         other => Error::ConnectionManager(other),
      }
   }
}
