//! Lifecycle notifications for transactions run through a connector.
//!
//! Every fresh (non re-entrant) invocation broadcasts, in order:
//!
//! ```text
//! connector_started
//!   [renewed_connection]          only when begin hit a stale connection
//!   started_transaction
//!   finished_with_commit | finished_with_rollback
//! connector_closed
//! ```
//!
//! Listeners are observed, not owned: the registry only keeps `Arc`s and
//! removal is by pointer identity.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use tracing::error;
use uuid::Uuid;

/// Lifecycle event names, in the order a fresh transaction emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
   ConnectorStarted,
   RenewedConnection,
   StartedTransaction,
   FinishedWithCommit,
   FinishedWithRollback,
   ConnectorClosed,
}

impl LifecycleEvent {
   pub fn as_str(&self) -> &'static str {
      match self {
         LifecycleEvent::ConnectorStarted => "connector_started",
         LifecycleEvent::RenewedConnection => "renewed_connection",
         LifecycleEvent::StartedTransaction => "started_transaction",
         LifecycleEvent::FinishedWithCommit => "finished_with_commit",
         LifecycleEvent::FinishedWithRollback => "finished_with_rollback",
         LifecycleEvent::ConnectorClosed => "connector_closed",
      }
   }

   fn deliver(self, listener: &dyn LifecycleListener, ctx: &TransactionContext) {
      match self {
         LifecycleEvent::ConnectorStarted => listener.connector_started(ctx),
         LifecycleEvent::RenewedConnection => listener.renewed_connection(ctx),
         LifecycleEvent::StartedTransaction => listener.started_transaction(ctx),
         LifecycleEvent::FinishedWithCommit => listener.finished_with_commit(ctx),
         LifecycleEvent::FinishedWithRollback => listener.finished_with_rollback(ctx),
         LifecycleEvent::ConnectorClosed => listener.connector_closed(ctx),
      }
   }
}

impl fmt::Display for LifecycleEvent {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Identifies the transaction an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionContext {
   unit_name: Arc<str>,
   transaction_id: Uuid,
}

impl TransactionContext {
   pub(crate) fn new(unit_name: Arc<str>) -> Self {
      Self {
         unit_name,
         transaction_id: Uuid::new_v4(),
      }
   }

   /// Persistence unit of the connector running the transaction.
   pub fn unit_name(&self) -> &str {
      &self.unit_name
   }

   /// Unique id of one fresh invocation.
   pub fn transaction_id(&self) -> Uuid {
      self.transaction_id
   }
}

/// Observer of transaction lifecycle events.
///
/// Each callback defaults to [`on_event`](Self::on_event), so a listener can
/// either handle everything in one place or override individual callbacks.
/// Closures taking `(LifecycleEvent, &TransactionContext)` are listeners too.
pub trait LifecycleListener: Send + Sync {
   fn on_event(&self, _event: LifecycleEvent, _ctx: &TransactionContext) {}

   fn connector_started(&self, ctx: &TransactionContext) {
      self.on_event(LifecycleEvent::ConnectorStarted, ctx);
   }

   fn renewed_connection(&self, ctx: &TransactionContext) {
      self.on_event(LifecycleEvent::RenewedConnection, ctx);
   }

   fn started_transaction(&self, ctx: &TransactionContext) {
      self.on_event(LifecycleEvent::StartedTransaction, ctx);
   }

   fn finished_with_commit(&self, ctx: &TransactionContext) {
      self.on_event(LifecycleEvent::FinishedWithCommit, ctx);
   }

   fn finished_with_rollback(&self, ctx: &TransactionContext) {
      self.on_event(LifecycleEvent::FinishedWithRollback, ctx);
   }

   fn connector_closed(&self, ctx: &TransactionContext) {
      self.on_event(LifecycleEvent::ConnectorClosed, ctx);
   }
}

impl<F> LifecycleListener for F
where
   F: Fn(LifecycleEvent, &TransactionContext) + Send + Sync,
{
   fn on_event(&self, event: LifecycleEvent, ctx: &TransactionContext) {
      self(event, ctx)
   }
}

type Snapshot = Arc<Vec<Arc<dyn LifecycleListener>>>;

static GLOBAL_LISTENERS: LazyLock<LifecycleListeners> = LazyLock::new(LifecycleListeners::new);

/// Thread-safe multicast sink for lifecycle events.
///
/// Mutation swaps in a new listener list under a write lock; broadcasting
/// clones the current list and calls every listener without holding the
/// lock. A listener added or removed mid-broadcast may or may not see that
/// broadcast. A panicking listener is logged and skipped.
///
/// Clones share the same listener list.
#[derive(Clone, Default)]
pub struct LifecycleListeners {
   listeners: Arc<RwLock<Snapshot>>,
}

impl LifecycleListeners {
   pub fn new() -> Self {
      Self::default()
   }

   /// The process-wide registry connectors use unless given their own.
   pub fn global() -> &'static LifecycleListeners {
      &GLOBAL_LISTENERS
   }

   pub fn add(&self, listener: Arc<dyn LifecycleListener>) {
      let mut guard = self.listeners.write();
      let mut next = Vec::with_capacity(guard.len() + 1);
      next.extend(guard.iter().cloned());
      next.push(listener);
      *guard = Arc::new(next);
   }

   /// Removes every registration of `listener`. Returns whether anything was removed.
   pub fn remove(&self, listener: &Arc<dyn LifecycleListener>) -> bool {
      let mut guard = self.listeners.write();
      let next: Vec<_> = guard
         .iter()
         .filter(|registered| !std::ptr::addr_eq(Arc::as_ptr(registered), Arc::as_ptr(listener)))
         .cloned()
         .collect();

      let removed = next.len() != guard.len();
      if removed {
         *guard = Arc::new(next);
      }
      removed
   }

   pub fn clear(&self) {
      *self.listeners.write() = Arc::default();
   }

   pub fn len(&self) -> usize {
      self.listeners.read().len()
   }

   pub fn is_empty(&self) -> bool {
      self.listeners.read().is_empty()
   }

   pub fn connector_started(&self, ctx: &TransactionContext) {
      self.broadcast(LifecycleEvent::ConnectorStarted, ctx);
   }

   pub fn renewed_connection(&self, ctx: &TransactionContext) {
      self.broadcast(LifecycleEvent::RenewedConnection, ctx);
   }

   pub fn started_transaction(&self, ctx: &TransactionContext) {
      self.broadcast(LifecycleEvent::StartedTransaction, ctx);
   }

   pub fn finished_with_commit(&self, ctx: &TransactionContext) {
      self.broadcast(LifecycleEvent::FinishedWithCommit, ctx);
   }

   pub fn finished_with_rollback(&self, ctx: &TransactionContext) {
      self.broadcast(LifecycleEvent::FinishedWithRollback, ctx);
   }

   pub fn connector_closed(&self, ctx: &TransactionContext) {
      self.broadcast(LifecycleEvent::ConnectorClosed, ctx);
   }

   fn broadcast(&self, event: LifecycleEvent, ctx: &TransactionContext) {
      let snapshot = Arc::clone(&self.listeners.read());

      for listener in snapshot.iter() {
         let delivered = catch_unwind(AssertUnwindSafe(|| event.deliver(listener.as_ref(), ctx)));
         if delivered.is_err() {
            error!(
               event = %event,
               unit = ctx.unit_name(),
               transaction_id = %ctx.transaction_id(),
               "Lifecycle listener panicked"
            );
         }
      }
   }
}

impl fmt::Debug for LifecycleListeners {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("LifecycleListeners")
         .field("len", &self.len())
         .finish()
   }
}
