//! SQLite provider: adapter, session traits for the SQLite session factory, and
//! connector bootstrap from paths, URLs and persistence unit documents.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use sqlx_sqlite_session_factory::{SessionFactoryConfig, SqliteSession, SqliteSessionFactory};
use tracing::{debug, warn};

use crate::adapter::ProviderAdapter;
use crate::connector::{Connector, validate_unit_name};
use crate::registry::ConnectorRegistry;
use crate::session::{Session, SessionFactory};
use crate::{Error, Result};

/// Connector over the SQLite session factory.
pub type SqliteConnector = Connector<SqliteSessionFactory>;

/// Extended result code for a database file that was moved or replaced while open.
const SQLITE_READONLY_DBMOVED: i32 = 1032;

/// Primary result code for disk I/O errors. Extended codes keep it in the low byte.
const SQLITE_IOERR: i32 = 10;

/// Adapter for [`SqliteSession`].
///
/// Treats I/O failures and crashed connection workers as stale connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteAdapter;

impl ProviderAdapter for SqliteAdapter {
   fn name(&self) -> &'static str {
      "sqlite"
   }

   fn recognizes(&self, session: &dyn Any) -> bool {
      session.is::<SqliteSession>()
   }

   fn extract_connection<'s>(&self, session: &'s mut dyn Any) -> Result<&'s mut SqliteConnection> {
      match session.downcast_mut::<SqliteSession>() {
         Some(session) => Ok(&mut **session),
         None => Err(Error::UnsupportedOperation {
            adapter: self.name(),
            operation: "extract_connection",
         }),
      }
   }

   fn is_reconnectable(&self, error: &Error) -> bool {
      match error {
         Error::Sqlx(err) | Error::SessionFactory(sqlx_sqlite_session_factory::Error::Sqlx(err)) => {
            is_stale_connection(err)
         }
         _ => false,
      }
   }
}

fn is_stale_connection(err: &sqlx::Error) -> bool {
   match err {
      sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
      sqlx::Error::Database(db_err) => db_err
         .code()
         .and_then(|code| code.parse::<i32>().ok())
         .is_some_and(is_stale_result_code),
      _ => false,
   }
}

fn is_stale_result_code(code: i32) -> bool {
   code & 0xff == SQLITE_IOERR || code == SQLITE_READONLY_DBMOVED
}

impl Session for SqliteSession {
   async fn begin(&mut self) -> Result<()> {
      Ok(self.begin_immediate().await?)
   }

   async fn commit(&mut self) -> Result<()> {
      Ok(SqliteSession::commit(self).await?)
   }

   async fn rollback(&mut self) -> Result<()> {
      Ok(SqliteSession::rollback(self).await?)
   }

   async fn close(self) -> Result<()> {
      Ok(self.release().await?)
   }

   async fn discard(self) -> Result<()> {
      Ok(SqliteSession::discard(self).await?)
   }
}

impl SessionFactory for SqliteSessionFactory {
   type Session = SqliteSession;

   async fn create_session(&self) -> Result<SqliteSession> {
      Ok(SqliteSessionFactory::create_session(self).await?)
   }

   async fn close(&self) -> Result<()> {
      Ok(SqliteSessionFactory::close(self).await?)
   }
}

impl Connector<SqliteSessionFactory> {
   /// Open a SQLite database file (created if missing) as persistence unit `name`.
   ///
   /// Uses [`SqliteAdapter`] and the global listener registry. A blank `name`
   /// fails with [`Error::InvalidArgument`] before the file is touched.
   pub async fn open(
      name: impl Into<String>,
      path: impl AsRef<Path>,
      config: Option<SessionFactoryConfig>,
   ) -> Result<Arc<Self>> {
      let name = name.into();
      validate_unit_name(&name)?;
      let factory = SqliteSessionFactory::connect(path, config).await?;
      Self::with_factory(name, factory)
   }

   /// Open a SQLite database from a sqlx URL such as `sqlite://orders.db?mode=rwc`
   /// or `sqlite::memory:`.
   pub async fn open_url(
      name: impl Into<String>,
      url: &str,
      config: Option<SessionFactoryConfig>,
   ) -> Result<Arc<Self>> {
      let name = name.into();
      validate_unit_name(&name)?;
      let factory = SqliteSessionFactory::connect_url(url, config).await?;
      Self::with_factory(name, factory)
   }

   // Callers validate the name first so a rejected name never opens a database
   fn with_factory(name: String, factory: SqliteSessionFactory) -> Result<Arc<Self>> {
      let path = factory.path().to_path_buf();
      let connector = Connector::builder(name, factory)
         .adapter(Arc::new(SqliteAdapter))
         .build()?;

      debug!(unit = connector.name(), path = %path.display(), "Opened SQLite connector");
      Ok(connector)
   }
}

/// Declarative description of a SQLite persistence unit.
///
/// ```
/// use sqlx_sqlite_connector::PersistenceUnit;
///
/// let unit: PersistenceUnit = serde_json::from_str(
///    r#"{ "name": "orders", "url": "sqlite::memory:", "default": true }"#,
/// ).unwrap();
/// assert_eq!(unit.factory.busy_timeout_ms, 5000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceUnit {
   pub name: String,

   /// sqlx SQLite URL of the database.
   pub url: String,

   /// Register as the registry's default connector.
   #[serde(default)]
   pub default: bool,

   #[serde(default)]
   pub factory: SessionFactoryConfig,
}

/// Open every unit and register it in `registry` under its name.
///
/// Either all units are registered or none: when one fails to open, the
/// factories already opened are closed and the error is returned.
pub async fn register_persistence_units(
   registry: &ConnectorRegistry,
   units: impl IntoIterator<Item = PersistenceUnit>,
) -> Result<Vec<Arc<SqliteConnector>>> {
   let mut opened = Vec::new();

   for unit in units {
      match SqliteConnector::open_url(unit.name.as_str(), &unit.url, Some(unit.factory.clone())).await
      {
         Ok(connector) => opened.push((unit, connector)),
         Err(err) => {
            for (_, connector) in opened {
               if let Err(close_err) = connector.close().await {
                  warn!(unit = connector.name(), error = %close_err, "Failed to close connector");
               }
            }
            return Err(err);
         }
      }
   }

   let mut connectors = Vec::with_capacity(opened.len());
   for (unit, connector) in opened {
      registry.register(unit.name, Arc::clone(&connector), unit.default)?;
      connectors.push(connector);
   }
   Ok(connectors)
}
