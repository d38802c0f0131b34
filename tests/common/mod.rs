//! Scripted in-memory session factory and a recording listener shared by the
//! connector integration tests.

#![allow(dead_code)]

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;
use sqlx_sqlite_connector::{
   Connector, Error, LifecycleEvent, LifecycleListener, LifecycleListeners, ProviderAdapter, Result,
   Session, SessionFactory, TransactionContext,
};

/// Failure a scripted call produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
   /// Connection went away; [`MockAdapter`] asks for a reconnect.
   Stale,
   /// Any other provider failure.
   Fatal,
}

impl Fault {
   fn into_error(self) -> Error {
      match self {
         Fault::Stale => Error::Sqlx(sqlx::Error::WorkerCrashed),
         Fault::Fatal => Error::Sqlx(sqlx::Error::PoolTimedOut),
      }
   }
}

#[derive(Default)]
struct Script {
   journal: Mutex<Vec<String>>,
   next_id: AtomicU32,
   create: Mutex<VecDeque<Fault>>,
   begin: Mutex<VecDeque<Fault>>,
   commit: Mutex<VecDeque<Fault>>,
   rollback: Mutex<VecDeque<Fault>>,
   factory_closes: AtomicUsize,
}

impl Script {
   fn record(&self, entry: String) {
      self.journal.lock().push(entry);
   }

   fn check(queue: &Mutex<VecDeque<Fault>>) -> Result<()> {
      match queue.lock().pop_front() {
         Some(fault) => Err(fault.into_error()),
         None => Ok(()),
      }
   }
}

/// Session factory whose failures are scripted per call.
///
/// Every call is journaled as `"<call>#<session id>"`, session ids start at 1.
#[derive(Default)]
pub struct MockFactory {
   script: Arc<Script>,
}

impl MockFactory {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn fail_next_create(&self, fault: Fault) {
      self.script.create.lock().push_back(fault);
   }

   pub fn fail_next_begin(&self, fault: Fault) {
      self.script.begin.lock().push_back(fault);
   }

   pub fn fail_next_commit(&self, fault: Fault) {
      self.script.commit.lock().push_back(fault);
   }

   pub fn fail_next_rollback(&self, fault: Fault) {
      self.script.rollback.lock().push_back(fault);
   }

   pub fn journal(&self) -> Vec<String> {
      self.script.journal.lock().clone()
   }

   pub fn sessions_created(&self) -> u32 {
      self.script.next_id.load(Ordering::SeqCst)
   }

   pub fn close_count(&self) -> usize {
      self.script.factory_closes.load(Ordering::SeqCst)
   }
}

impl SessionFactory for MockFactory {
   type Session = MockSession;

   async fn create_session(&self) -> Result<MockSession> {
      Script::check(&self.script.create)?;
      let id = self.script.next_id.fetch_add(1, Ordering::SeqCst) + 1;
      self.script.record(format!("create#{id}"));

      Ok(MockSession {
         id,
         script: Arc::clone(&self.script),
      })
   }

   async fn close(&self) -> Result<()> {
      self.script.factory_closes.fetch_add(1, Ordering::SeqCst);
      Ok(())
   }
}

pub struct MockSession {
   pub id: u32,
   script: Arc<Script>,
}

impl Session for MockSession {
   async fn begin(&mut self) -> Result<()> {
      self.script.record(format!("begin#{}", self.id));
      Script::check(&self.script.begin)
   }

   async fn commit(&mut self) -> Result<()> {
      self.script.record(format!("commit#{}", self.id));
      Script::check(&self.script.commit)
   }

   async fn rollback(&mut self) -> Result<()> {
      self.script.record(format!("rollback#{}", self.id));
      Script::check(&self.script.rollback)
   }

   async fn close(self) -> Result<()> {
      self.script.record(format!("close#{}", self.id));
      Ok(())
   }

   async fn discard(self) -> Result<()> {
      self.script.record(format!("discard#{}", self.id));
      Ok(())
   }
}

/// Recognizes [`MockSession`]; worker crashes are reconnectable.
pub struct MockAdapter;

impl ProviderAdapter for MockAdapter {
   fn name(&self) -> &'static str {
      "mock"
   }

   fn recognizes(&self, session: &dyn Any) -> bool {
      session.is::<MockSession>()
   }

   fn is_reconnectable(&self, error: &Error) -> bool {
      matches!(error, Error::Sqlx(sqlx::Error::WorkerCrashed))
   }
}

/// Records every event it receives, in order.
#[derive(Default)]
pub struct RecordingListener {
   events: Mutex<Vec<(LifecycleEvent, TransactionContext)>>,
}

impl RecordingListener {
   pub fn events(&self) -> Vec<&'static str> {
      self.events.lock().iter().map(|(event, _)| event.as_str()).collect()
   }

   pub fn contexts(&self) -> Vec<TransactionContext> {
      self.events.lock().iter().map(|(_, ctx)| ctx.clone()).collect()
   }
}

impl LifecycleListener for RecordingListener {
   fn on_event(&self, event: LifecycleEvent, ctx: &TransactionContext) {
      self.events.lock().push((event, ctx.clone()));
   }
}

/// Route connector logs to the test output. Safe to call from every test.
pub fn init_tracing() {
   let _ = tracing_subscriber::fmt()
      .with_max_level(tracing::Level::TRACE)
      .with_test_writer()
      .try_init();
}

/// Connector over a fresh [`MockFactory`] that reports to its own listener.
pub fn mock_connector(name: &str) -> (Arc<Connector<MockFactory>>, Arc<RecordingListener>) {
   let recorder = Arc::new(RecordingListener::default());
   let listeners = LifecycleListeners::new();
   listeners.add(recorder.clone());

   let connector = Connector::builder(name, MockFactory::new())
      .adapter(Arc::new(MockAdapter))
      .listeners(listeners)
      .build()
      .expect("valid connector name");

   (connector, recorder)
}

pub const COMMITTED: [&str; 4] = [
   "connector_started",
   "started_transaction",
   "finished_with_commit",
   "connector_closed",
];

pub const ROLLED_BACK: [&str; 4] = [
   "connector_started",
   "started_transaction",
   "finished_with_rollback",
   "connector_closed",
];
