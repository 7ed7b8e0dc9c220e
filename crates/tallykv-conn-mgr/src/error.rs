//! Error types for tallykv-conn-mgr

use thiserror::Error;

/// Errors that may occur when working with tallykv-conn-mgr
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Database has been closed and cannot be used
   #[error("Database has been closed")]
   DatabaseClosed,

   /// Timed out waiting for the exclusive write connection
   #[error("Timed out waiting for the exclusive write connection")]
   WriterBusy,
}
