//! Error types for sqlx-sqlite-session-factory

use thiserror::Error;

/// Errors that may occur when creating or using SQLite sessions
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Session factory has been closed and cannot hand out sessions
   #[error("Session factory has been closed")]
   FactoryClosed,
}
