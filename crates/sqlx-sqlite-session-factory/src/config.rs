//! Configuration for the SQLite session factory

use serde::{Deserialize, Serialize};

/// Configuration for the connection pool backing a [`SqliteSessionFactory`]
///
/// Every field has a default, so partial documents deserialize cleanly.
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_session_factory::SessionFactoryConfig;
///
/// // Use defaults
/// let config = SessionFactoryConfig::default();
///
/// // Override just one field
/// let config = SessionFactoryConfig {
///     busy_timeout_ms: 250,
///     ..Default::default()
/// };
/// ```
///
/// [`SqliteSessionFactory`]: crate::SqliteSessionFactory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFactoryConfig {
   /// Idle timeout for the pooled write connection (in seconds)
   ///
   /// A connection that remains idle for this duration is closed and
   /// transparently reopened by the next session. Ignored for `:memory:`
   /// databases, whose contents live only as long as their connection.
   ///
   /// Default: 30
   pub idle_timeout_secs: u64,

   /// How long `create_session()` waits for the write connection (in seconds)
   ///
   /// SQLite allows a single writer, so a session request blocks while another
   /// session holds the connection.
   ///
   /// Default: 30
   pub acquire_timeout_secs: u64,

   /// SQLite busy timeout applied to every connection (in milliseconds)
   ///
   /// Default: 5000
   pub busy_timeout_ms: u64,
}

impl Default for SessionFactoryConfig {
   fn default() -> Self {
      Self {
         idle_timeout_secs: 30,
         acquire_timeout_secs: 30,
         busy_timeout_ms: 5000,
      }
   }
}
