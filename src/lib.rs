//! Transaction-scoped session management for SQLite on SQLx.
//!
//! A [`Connector`] owns a session factory for one persistence unit and runs
//! caller operations inside exactly one transaction per task. Nested calls on
//! the same task join the running transaction. The session of the running
//! transaction is available anywhere below the outermost call through
//! [`Connector::get_session`].
//!
//! - [`Connector`] / [`SqliteConnector`]: demarcates transactions, emits lifecycle events
//! - [`Transactional`]: an operation bound to a connector ([`Connector::transact`])
//! - [`SessionHandle`]: the task's session, swappable when a stale connection is renewed
//! - [`ProviderAdapter`] / [`AdapterCatalog`]: per-provider capabilities and their discovery
//! - [`LifecycleListeners`]: ordered observers of transaction lifecycle events
//! - [`ConnectorRegistry`]: connectors by persistence unit name
//!
//! # Example
//!
//! ```no_run
//! use sqlx_sqlite_connector::{Error, SqliteConnector};
//!
//! # async fn example() -> Result<(), Error> {
//! let db = SqliteConnector::open("orders", "orders.db", None).await?;
//!
//! let insert = db.transact(|item: &'static str| {
//!    let db = db.clone();
//!    async move {
//!       let session = db.get_session()?;
//!       let mut guard = session.lock().await?;
//!       let done = sqlx::query("INSERT INTO orders (item) VALUES (?)")
//!          .bind(item)
//!          .execute(guard.connection()?)
//!          .await?;
//!       Ok::<_, Error>(done.last_insert_rowid())
//!    }
//! });
//!
//! let id = insert.call("widget").await?;
//! println!("inserted order {id}");
//!
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod connector;
mod error;
mod handle;
mod listener;
mod registry;
mod session;
mod sqlite;

pub use adapter::{AdapterCatalog, GenericAdapter, ProviderAdapter};
pub use connector::{Connector, ConnectorBuilder, Transactional};
pub use error::{BoxDynError, Error, Result, TransactionPhase};
pub use handle::{SessionGuard, SessionHandle};
pub use listener::{LifecycleEvent, LifecycleListener, LifecycleListeners, TransactionContext};
pub use registry::ConnectorRegistry;
pub use session::{Session, SessionFactory};
pub use sqlite::{PersistenceUnit, SqliteAdapter, SqliteConnector, register_persistence_units};

// Re-export the SQLite session factory the bootstrap functions build on
pub use sqlx_sqlite_session_factory::{
   SessionFactoryConfig, SqliteSession, SqliteSessionFactory,
};
