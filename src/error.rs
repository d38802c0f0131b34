use std::fmt;

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by a caller-supplied operation.
pub type BoxDynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Transaction boundary at which a provider call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
   Begin,
   Commit,
   Rollback,
}

impl TransactionPhase {
   fn as_str(&self) -> &'static str {
      match self {
         TransactionPhase::Begin => "begin",
         TransactionPhase::Commit => "commit",
         TransactionPhase::Rollback => "rollback",
      }
   }
}

impl fmt::Display for TransactionPhase {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Error types for connector operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),

   /// Error from the session factory.
   #[error(transparent)]
   SessionFactory(#[from] sqlx_sqlite_session_factory::Error),

   /// A construction or registration argument was rejected.
   #[error("invalid argument: {0}")]
   InvalidArgument(String),

   /// A session was requested outside of a transaction.
   #[error("no active transaction for connector: {0}")]
   NoActiveTransaction(String),

   /// The provider adapter cannot act on the given session.
   #[error("provider adapter '{adapter}' does not support {operation} for this session")]
   UnsupportedOperation {
      adapter: &'static str,
      operation: &'static str,
   },

   /// Begin, commit or rollback failed and the failure was not recovered.
   #[error("transaction {phase} failed: {source}")]
   Transaction {
      phase: TransactionPhase,
      #[source]
      source: Box<Error>,
   },

   /// The wrapped business operation failed.
   #[error("operation failed: {0}")]
   Operation(#[source] BoxDynError),

   /// No connector is registered under this name.
   #[error("connector not registered: {0}")]
   ConnectorNotFound(String),

   /// The registry has no default connector.
   #[error("no default connector registered")]
   NoDefaultConnector,

   /// The connector exists but was built over a different session factory type.
   #[error("connector {0} is registered with a different session factory type")]
   ConnectorTypeMismatch(String),

   /// Connector has been closed and cannot run transactions.
   #[error("connector has been closed: {0}")]
   ConnectorClosed(String),

   /// Session handle no longer holds a session.
   #[error("session has been closed")]
   SessionClosed,
}

impl Error {
   /// Wrap a caller operation's failure.
   pub fn operation(err: impl Into<BoxDynError>) -> Self {
      Error::Operation(err.into())
   }

   pub(crate) fn transaction(phase: TransactionPhase, source: Error) -> Self {
      Error::Transaction {
         phase,
         source: Box::new(source),
      }
   }

   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Sqlx(e) => sqlx_error_code(e),
         Error::SessionFactory(sqlx_sqlite_session_factory::Error::Sqlx(e)) => sqlx_error_code(e),
         Error::SessionFactory(sqlx_sqlite_session_factory::Error::FactoryClosed) => {
            "SESSION_FACTORY_CLOSED".to_string()
         }
         Error::SessionFactory(_) => "SESSION_FACTORY_ERROR".to_string(),
         Error::InvalidArgument(_) => "INVALID_ARGUMENT".to_string(),
         Error::NoActiveTransaction(_) => "NO_ACTIVE_TRANSACTION".to_string(),
         Error::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION".to_string(),
         Error::Transaction { phase, .. } => {
            format!("TRANSACTION_{}_FAILED", phase.as_str().to_uppercase())
         }
         Error::Operation(_) => "OPERATION_FAILED".to_string(),
         Error::ConnectorNotFound(_) => "CONNECTOR_NOT_FOUND".to_string(),
         Error::NoDefaultConnector => "NO_DEFAULT_CONNECTOR".to_string(),
         Error::ConnectorTypeMismatch(_) => "CONNECTOR_TYPE_MISMATCH".to_string(),
         Error::ConnectorClosed(_) => "CONNECTOR_CLOSED".to_string(),
         Error::SessionClosed => "SESSION_CLOSED".to_string(),
      }
   }
}

fn sqlx_error_code(e: &sqlx::Error) -> String {
   if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
      return format!("SQLITE_{}", code);
   }
   "SQLX_ERROR".to_string()
}
