//! SQLite session factory backed by a single-connection write pool

use crate::Result;
use crate::config::SessionFactoryConfig;
use crate::error::Error;
use crate::session::SqliteSession;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Long-lived factory handing out [`SqliteSession`]s for one database.
///
/// SQLite permits a single writer, so the factory keeps a pool with exactly one
/// read-write connection. Each session holds that connection until it is
/// released, which serializes sessions across tasks.
///
/// WAL mode is enabled when the first session of a file database is created.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_session_factory::SqliteSessionFactory;
///
/// # async fn example() -> Result<(), sqlx_sqlite_session_factory::Error> {
/// let factory = SqliteSessionFactory::connect("test.db", None).await?;
///
/// let mut session = factory.create_session().await?;
/// session.begin_immediate().await?;
/// sqlx::query("INSERT INTO users (name) VALUES (?)")
///     .bind("Alice")
///     .execute(&mut *session)
///     .await?;
/// session.commit().await?;
/// session.release().await?;
///
/// factory.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SqliteSessionFactory {
   /// Single read-write connection pool (max_connections=1)
   write_conn: Pool<Sqlite>,

   /// Tracks if WAL mode has been initialized (set on first session)
   wal_initialized: AtomicBool,

   /// Marks factory as closed to prevent further sessions
   closed: AtomicBool,

   /// Database file name as given to SQLite
   path: PathBuf,

   /// In-memory databases skip WAL and never expire their connection
   in_memory: bool,
}

impl SqliteSessionFactory {
   /// Open a session factory for a SQLite database file
   ///
   /// The database is created if it doesn't exist. `":memory:"` opens a
   /// private in-memory database that lives as long as the factory's connection.
   ///
   /// # Arguments
   ///
   /// * `path` - Path to the SQLite database file (will be created if missing)
   /// * `custom_config` - Optional pool configuration. Pass `None` to use defaults
   ///   (30 second idle timeout, 30 second acquire timeout, 5 second busy timeout).
   ///
   /// # Examples
   ///
   /// ```no_run
   /// use sqlx_sqlite_session_factory::{SessionFactoryConfig, SqliteSessionFactory};
   ///
   /// # async fn example() -> Result<(), sqlx_sqlite_session_factory::Error> {
   /// let factory = SqliteSessionFactory::connect("test.db", None).await?;
   ///
   /// let config = SessionFactoryConfig {
   ///    busy_timeout_ms: 250,
   ///    ..Default::default()
   /// };
   /// let other = SqliteSessionFactory::connect("other.db", Some(config)).await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn connect(
      path: impl AsRef<Path>,
      custom_config: Option<SessionFactoryConfig>,
   ) -> Result<Self> {
      let path = path.as_ref();

      // Validate path is not empty
      if path.as_os_str().is_empty() {
         return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Database path cannot be empty",
         )));
      }

      let options = SqliteConnectOptions::new()
         .filename(path)
         .create_if_missing(true)
         .read_only(false);

      Self::open(options, custom_config.unwrap_or_default()).await
   }

   /// Open a session factory from a sqlx SQLite URL
   ///
   /// Accepts anything `SqliteConnectOptions` parses, e.g.
   /// `sqlite://data/orders.db?mode=rwc` or `sqlite::memory:`.
   pub async fn connect_url(
      url: &str,
      custom_config: Option<SessionFactoryConfig>,
   ) -> Result<Self> {
      let options = SqliteConnectOptions::from_str(url)?;
      Self::open(options, custom_config.unwrap_or_default()).await
   }

   async fn open(options: SqliteConnectOptions, config: SessionFactoryConfig) -> Result<Self> {
      let path = options.get_filename().to_path_buf();
      let in_memory = is_memory_database(&path);

      let options = options.busy_timeout(Duration::from_millis(config.busy_timeout_ms));

      // Closing the only connection of an in-memory database would drop its contents
      let idle_timeout = if in_memory {
         None
      } else {
         Some(Duration::from_secs(config.idle_timeout_secs))
      };

      let write_conn = SqlitePoolOptions::new()
         .max_connections(1)
         .min_connections(0)
         .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
         .idle_timeout(idle_timeout)
         .max_lifetime(None)
         .connect_with(options)
         .await?;

      debug!(path = %path.display(), in_memory, "Opened SQLite session factory");

      Ok(Self {
         write_conn,
         wal_initialized: AtomicBool::new(false),
         closed: AtomicBool::new(false),
         path,
         in_memory,
      })
   }

   /// Create a session holding the exclusive write connection
   ///
   /// Waits while another session holds the connection. On the first call for
   /// a file database this enables WAL mode.
   pub async fn create_session(&self) -> Result<SqliteSession> {
      if self.closed.load(Ordering::SeqCst) {
         return Err(Error::FactoryClosed);
      }

      // Acquire connection from pool (max=1 ensures exclusive access)
      let mut conn = self.write_conn.acquire().await?;

      // Initialize WAL mode on first use (idempotent and safe)
      if !self.in_memory && !self.wal_initialized.load(Ordering::SeqCst) {
         sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *conn)
            .await?;

         // https://www.sqlite.org/wal.html#performance_considerations
         sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&mut *conn)
            .await?;

         self.wal_initialized.store(true, Ordering::SeqCst);
      }

      Ok(SqliteSession::new(conn))
   }

   /// Close the factory and its connection pool
   ///
   /// Waits for an outstanding session to be released. After the first call
   /// every further `create_session()` or `close()` returns
   /// `Error::FactoryClosed`.
   pub async fn close(&self) -> Result<()> {
      if self.closed.swap(true, Ordering::SeqCst) {
         return Err(Error::FactoryClosed);
      }

      // Checkpoint WAL before closing the write connection to flush changes and truncate WAL file
      // Only attempt if WAL was initialized (a session was created)
      if self.wal_initialized.load(Ordering::SeqCst)
         && let Ok(mut conn) = self.write_conn.acquire().await
      {
         let _ = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&mut *conn)
            .await;
      }

      self.write_conn.close().await;
      debug!(path = %self.path.display(), "Closed SQLite session factory");

      Ok(())
   }

   /// Database file name the factory was opened with
   pub fn path(&self) -> &Path {
      &self.path
   }

   /// Whether `close()` has been called
   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::SeqCst)
   }

   /// Whether the factory serves an in-memory database
   pub fn is_memory(&self) -> bool {
      self.in_memory
   }
}

/// Recognizes the file names SQLite and sqlx use for in-memory databases
pub(crate) fn is_memory_database(path: &Path) -> bool {
   let name = path.to_string_lossy();
   name == ":memory:" || name.starts_with("file:sqlx-in-memory") || name.contains("mode=memory")
}
