//! Transaction demarcation engine.
//!
//! A [`Connector`] runs caller operations inside exactly one transaction per
//! task. The first (fresh) invocation on a task creates a session, binds it to
//! the task, begins, runs the operation, commits or rolls back, then unbinds
//! and closes the session. Invocations nested inside that operation on the
//! same task join the running transaction instead of starting another one.
//!
//! ```text
//!   Idle ──fresh execute──► Active ──commit / rollback──► Idle
//!                            │  ▲
//!                            └──┘ nested execute (in-line, no events)
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use tracing::{debug, error, trace, warn};

use crate::adapter::{AdapterCatalog, GenericAdapter, ProviderAdapter};
use crate::error::TransactionPhase;
use crate::handle::SessionHandle;
use crate::listener::{LifecycleListeners, TransactionContext};
use crate::session::SessionFactory;
use crate::{Error, Result};

static NEXT_CONNECTOR_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
   static BOUND_SESSIONS: BoundSessions;
}

/// Session handles bound to the current task, keyed by connector id.
///
/// Lives in a task-local scope entered by each fresh invocation, so the
/// binding is released on every exit path including panics and cancellation.
#[derive(Clone, Default)]
struct BoundSessions(Vec<(u64, Arc<dyn Any + Send + Sync>)>);

impl BoundSessions {
   fn current() -> Self {
      BOUND_SESSIONS.try_with(Clone::clone).unwrap_or_default()
   }

   fn with(mut self, connector_id: u64, handle: Arc<dyn Any + Send + Sync>) -> Self {
      self.0.push((connector_id, handle));
      self
   }

   fn lookup(connector_id: u64) -> Option<Arc<dyn Any + Send + Sync>> {
      BOUND_SESSIONS
         .try_with(|bound| {
            bound
               .0
               .iter()
               .find(|(id, _)| *id == connector_id)
               .map(|(_, handle)| Arc::clone(handle))
         })
         .ok()
         .flatten()
   }
}

enum Outcome<T, E> {
   Finished(std::result::Result<T, E>),
   Panicked(Box<dyn Any + Send>),
}

/// Transaction-scoped access to sessions of one persistence unit.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_connector::{Error, SqliteConnector};
///
/// # async fn example() -> Result<(), Error> {
/// let orders = SqliteConnector::open("orders", "orders.db", None).await?;
///
/// let id = orders
///    .execute(|| async {
///       let session = orders.get_session()?;
///       let mut guard = session.lock().await?;
///       let done = sqlx::query("INSERT INTO orders (item) VALUES (?)")
///          .bind("widget")
///          .execute(guard.connection()?)
///          .await?;
///       Ok::<_, Error>(done.last_insert_rowid())
///    })
///    .await?;
///
/// orders.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Connector<F: SessionFactory> {
   id: u64,
   name: Arc<str>,
   factory: F,
   adapter: OnceLock<Arc<dyn ProviderAdapter>>,
   catalog: AdapterCatalog,
   listeners: LifecycleListeners,
   closed: AtomicBool,
}

impl<F: SessionFactory> Connector<F> {
   /// Start building a connector for the persistence unit `name`.
   pub fn builder(name: impl Into<String>, factory: F) -> ConnectorBuilder<F> {
      ConnectorBuilder {
         name: name.into(),
         factory,
         adapter: None,
         catalog: None,
         listeners: None,
      }
   }

   /// Persistence unit name.
   pub fn name(&self) -> &str {
      &self.name
   }

   /// Process-unique id of this connector.
   pub fn id(&self) -> u64 {
      self.id
   }

   /// The provider adapter, once chosen.
   ///
   /// Connectors built without an explicit adapter resolve it from their
   /// catalog when the first session is created.
   pub fn adapter(&self) -> Option<&Arc<dyn ProviderAdapter>> {
      self.adapter.get()
   }

   /// Listener registry receiving this connector's lifecycle events.
   pub fn listeners(&self) -> &LifecycleListeners {
      &self.listeners
   }

   pub fn factory(&self) -> &F {
      &self.factory
   }

   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::SeqCst)
   }

   /// Whether the current task is inside a transaction of this connector.
   pub fn in_transaction(&self) -> bool {
      BoundSessions::lookup(self.id).is_some()
   }

   /// Session of the transaction running on the current task.
   ///
   /// Fails with [`Error::NoActiveTransaction`] outside of [`execute`](Self::execute)
   /// or a [`Transactional`] call.
   pub fn get_session(&self) -> Result<SessionHandle<F::Session>> {
      self
         .bound_handle()
         .ok_or_else(|| Error::NoActiveTransaction(self.name.to_string()))
   }

   /// Wrap `op` so each [`Transactional::call`] runs it inside a transaction.
   ///
   /// Nothing happens until the returned value is called.
   pub fn transact<Op>(self: &Arc<Self>, op: Op) -> Transactional<F, Op> {
      Transactional {
         connector: Arc::clone(self),
         op,
      }
   }

   /// Run `op` inside a transaction and return its result.
   ///
   /// On a task already inside a transaction of this connector `op` simply
   /// runs as part of it. Otherwise a fresh transaction is demarcated: commit
   /// when `op` returns `Ok`, rollback when it returns `Err` or panics. A begin
   /// that fails on a stale connection is retried once on a new session.
   ///
   /// When both `op` and the rollback fail, `op`'s error is returned and the
   /// rollback error is logged.
   pub async fn execute<T, E, Op, Fut>(&self, op: Op) -> std::result::Result<T, E>
   where
      Op: FnOnce() -> Fut,
      Fut: Future<Output = std::result::Result<T, E>>,
      E: From<Error>,
   {
      if self.bound_handle().is_some() {
         trace!(unit = %self.name, "Joining active transaction");
         return op().await;
      }

      if self.is_closed() {
         return Err(Error::ConnectorClosed(self.name.to_string()).into());
      }

      let session = self.factory.create_session().await?;
      let adapter = self.resolve_adapter(&session);
      let handle = SessionHandle::new(session, adapter, Arc::clone(&self.name));
      let ctx = TransactionContext::new(Arc::clone(&self.name));

      debug!(unit = %self.name, transaction_id = %ctx.transaction_id(), "Session created");

      let bound = BoundSessions::current().with(self.id, Arc::new(handle.clone()));
      let outcome = BOUND_SESSIONS
         .scope(bound, self.demarcate(&handle, &ctx, op))
         .await;

      // The task-local scope has ended, so the session is no longer bound
      let closed = handle.close().await;
      self.listeners.connector_closed(&ctx);

      match outcome {
         Outcome::Finished(Ok(value)) => {
            closed?;
            Ok(value)
         }
         Outcome::Finished(Err(err)) => {
            if let Err(close_err) = closed {
               warn!(unit = %self.name, transaction_id = %ctx.transaction_id(), error = %close_err, "Failed to close session after failure");
            }
            Err(err)
         }
         Outcome::Panicked(payload) => {
            if let Err(close_err) = closed {
               warn!(unit = %self.name, transaction_id = %ctx.transaction_id(), error = %close_err, "Failed to close session after panic");
            }
            std::panic::resume_unwind(payload)
         }
      }
   }

   /// Close the session factory.
   ///
   /// Only the first call reaches the factory; later calls return
   /// [`Error::ConnectorClosed`]. Transactions must not be in flight.
   pub async fn close(&self) -> Result<()> {
      if self.closed.swap(true, Ordering::SeqCst) {
         return Err(Error::ConnectorClosed(self.name.to_string()));
      }

      debug!(unit = %self.name, "Closing connector");
      self.factory.close().await
   }

   async fn demarcate<T, E, Op, Fut>(
      &self,
      handle: &SessionHandle<F::Session>,
      ctx: &TransactionContext,
      op: Op,
   ) -> Outcome<T, E>
   where
      Op: FnOnce() -> Fut,
      Fut: Future<Output = std::result::Result<T, E>>,
      E: From<Error>,
   {
      self.listeners.connector_started(ctx);

      // A failed begin may leave a partial transaction; providers treat
      // rollback without one as a no-op
      if let Err(err) = self.begin(handle, ctx).await {
         self.roll_back(handle, ctx).await;
         return Outcome::Finished(Err(err.into()));
      }
      self.listeners.started_transaction(ctx);

      let attempt = AssertUnwindSafe(async move { op().await })
         .catch_unwind()
         .await;

      match attempt {
         Ok(Ok(value)) => match handle.commit().await {
            Ok(()) => {
               debug!(unit = %self.name, transaction_id = %ctx.transaction_id(), "Transaction committed");
               self.listeners.finished_with_commit(ctx);
               Outcome::Finished(Ok(value))
            }
            Err(err) => {
               Outcome::Finished(Err(Error::transaction(TransactionPhase::Commit, err).into()))
            }
         },
         Ok(Err(err)) => {
            self.roll_back(handle, ctx).await;
            Outcome::Finished(Err(err))
         }
         Err(payload) => {
            self.roll_back(handle, ctx).await;
            Outcome::Panicked(payload)
         }
      }
   }

   async fn begin(&self, handle: &SessionHandle<F::Session>, ctx: &TransactionContext) -> Result<()> {
      let Err(err) = handle.begin().await else {
         return Ok(());
      };

      if !handle.adapter().is_reconnectable(&err) {
         return Err(Error::transaction(TransactionPhase::Begin, err));
      }

      warn!(
         unit = %self.name,
         transaction_id = %ctx.transaction_id(),
         error = %err,
         "Stale connection on begin, renewing session"
      );
      self.listeners.renewed_connection(ctx);

      handle.replace(|| self.factory.create_session()).await?;

      // Retried exactly once
      handle
         .begin()
         .await
         .map_err(|err| Error::transaction(TransactionPhase::Begin, err))
   }

   async fn roll_back(&self, handle: &SessionHandle<F::Session>, ctx: &TransactionContext) {
      match handle.rollback().await {
         Ok(()) => {
            debug!(unit = %self.name, transaction_id = %ctx.transaction_id(), "Transaction rolled back");
            self.listeners.finished_with_rollback(ctx);
         }
         Err(err) => {
            let err = Error::transaction(TransactionPhase::Rollback, err);
            error!(
               unit = %self.name,
               transaction_id = %ctx.transaction_id(),
               error = %err,
               "Rollback failed, surfacing the original failure"
            );
         }
      }
   }

   fn bound_handle(&self) -> Option<SessionHandle<F::Session>> {
      BoundSessions::lookup(self.id)?
         .downcast_ref::<SessionHandle<F::Session>>()
         .cloned()
   }

   fn resolve_adapter(&self, session: &F::Session) -> Arc<dyn ProviderAdapter> {
      let adapter = self.adapter.get_or_init(|| {
         let adapter = self
            .catalog
            .find(session)
            .unwrap_or_else(|| Arc::new(GenericAdapter));
         debug!(unit = %self.name, adapter = adapter.name(), "Resolved provider adapter");
         adapter
      });
      Arc::clone(adapter)
   }
}

impl<F: SessionFactory> fmt::Debug for Connector<F> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Connector")
         .field("id", &self.id)
         .field("name", &self.name)
         .field("adapter", &self.adapter.get().map(|a| a.name()))
         .field("closed", &self.is_closed())
         .finish()
   }
}

/// Builder for [`Connector`].
pub struct ConnectorBuilder<F> {
   name: String,
   factory: F,
   adapter: Option<Arc<dyn ProviderAdapter>>,
   catalog: Option<AdapterCatalog>,
   listeners: Option<LifecycleListeners>,
}

impl<F: SessionFactory> ConnectorBuilder<F> {
   /// Use `adapter` instead of discovering one from the catalog.
   pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
      self.adapter = Some(adapter);
      self
   }

   /// Catalog to discover the adapter from. Defaults to [`AdapterCatalog::global`].
   pub fn catalog(mut self, catalog: AdapterCatalog) -> Self {
      self.catalog = Some(catalog);
      self
   }

   /// Listener registry to notify. Defaults to [`LifecycleListeners::global`].
   pub fn listeners(mut self, listeners: LifecycleListeners) -> Self {
      self.listeners = Some(listeners);
      self
   }

   pub fn build(self) -> Result<Arc<Connector<F>>> {
      let name = validate_unit_name(&self.name)?;

      let adapter = OnceLock::new();
      if let Some(explicit) = self.adapter {
         let _ = adapter.set(explicit);
      }

      Ok(Arc::new(Connector {
         id: NEXT_CONNECTOR_ID.fetch_add(1, Ordering::Relaxed),
         name: Arc::from(name),
         factory: self.factory,
         adapter,
         catalog: self.catalog.unwrap_or_else(|| AdapterCatalog::global().clone()),
         listeners: self
            .listeners
            .unwrap_or_else(|| LifecycleListeners::global().clone()),
         closed: AtomicBool::new(false),
      }))
   }
}

/// Trimmed persistence unit name, rejecting blank names.
pub(crate) fn validate_unit_name(name: &str) -> Result<&str> {
   let name = name.trim();
   if name.is_empty() {
      return Err(Error::InvalidArgument(
         "persistence unit name cannot be empty".into(),
      ));
   }
   Ok(name)
}

/// An operation bound to a connector.
///
/// Created by [`Connector::transact`]. Every [`call`](Self::call) is one
/// invocation of the connector's demarcation engine.
pub struct Transactional<F: SessionFactory, Op> {
   connector: Arc<Connector<F>>,
   op: Op,
}

impl<F: SessionFactory, Op> Transactional<F, Op> {
   /// Invoke the wrapped operation inside a transaction.
   ///
   /// Multi-argument operations take a tuple; zero-argument ones take `()`.
   pub async fn call<A, T, E, Fut>(&self, args: A) -> std::result::Result<T, E>
   where
      Op: Fn(A) -> Fut,
      Fut: Future<Output = std::result::Result<T, E>>,
      E: From<Error>,
   {
      self.connector.execute(|| (self.op)(args)).await
   }

   pub fn connector(&self) -> &Arc<Connector<F>> {
      &self.connector
   }

   /// Unwrap the original operation.
   pub fn into_inner(self) -> Op {
      self.op
   }
}

impl<F: SessionFactory, Op: Clone> Clone for Transactional<F, Op> {
   fn clone(&self) -> Self {
      Self {
         connector: Arc::clone(&self.connector),
         op: self.op.clone(),
      }
   }
}

impl<F: SessionFactory, Op> fmt::Debug for Transactional<F, Op> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Transactional")
         .field("connector", &self.connector.name())
         .finish_non_exhaustive()
   }
}
