//! Swappable wrapper around the provider session bound to a transaction.

use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sqlx::sqlite::SqliteConnection;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::adapter::ProviderAdapter;
use crate::session::Session;
use crate::{Error, Result};

/// Handle to the session of the transaction running on the current task.
///
/// Cloning is cheap; all clones refer to the same delegate. The delegate is
/// only swapped by the connector's reconnect path and is closed when the
/// transaction ends, after which [`lock`](Self::lock) fails with
/// [`Error::SessionClosed`].
///
/// `SessionHandle` deliberately does not implement [`Session`], so a handle
/// can never end up wrapping another handle.
pub struct SessionHandle<S> {
   inner: Arc<HandleInner<S>>,
}

struct HandleInner<S> {
   unit_name: Arc<str>,
   adapter: Arc<dyn ProviderAdapter>,
   delegate: Mutex<Option<S>>,
   generation: AtomicU64,
}

impl<S> Clone for SessionHandle<S> {
   fn clone(&self) -> Self {
      Self {
         inner: Arc::clone(&self.inner),
      }
   }
}

impl<S: Session> SessionHandle<S> {
   pub(crate) fn new(delegate: S, adapter: Arc<dyn ProviderAdapter>, unit_name: Arc<str>) -> Self {
      Self {
         inner: Arc::new(HandleInner {
            unit_name,
            adapter,
            delegate: Mutex::new(Some(delegate)),
            generation: AtomicU64::new(0),
         }),
      }
   }

   /// Lock the current delegate for exclusive use.
   ///
   /// Drop the guard before the operation returns: commit and rollback need
   /// the same lock. Nested calls on the same task must not hold an outer guard
   /// while locking again.
   pub async fn lock(&self) -> Result<SessionGuard<'_, S>> {
      trace!(unit = %self.inner.unit_name, "Locking session");
      let guard = self.inner.delegate.lock().await;
      let session = MutexGuard::try_map(guard, Option::as_mut).map_err(|_| Error::SessionClosed)?;

      Ok(SessionGuard {
         session,
         adapter: self.inner.adapter.as_ref(),
      })
   }

   /// Whether the handle still holds a session.
   pub async fn is_open(&self) -> bool {
      self.inner.delegate.lock().await.is_some()
   }

   /// Adapter of the provider that created the session.
   pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
      &self.inner.adapter
   }

   /// Persistence unit of the owning connector.
   pub fn unit_name(&self) -> &str {
      &self.inner.unit_name
   }

   /// Number of times the delegate has been replaced.
   pub fn generation(&self) -> u64 {
      self.inner.generation.load(Ordering::SeqCst)
   }

   pub(crate) async fn begin(&self) -> Result<()> {
      let mut delegate = self.inner.delegate.lock().await;
      delegate.as_mut().ok_or(Error::SessionClosed)?.begin().await
   }

   pub(crate) async fn commit(&self) -> Result<()> {
      let mut delegate = self.inner.delegate.lock().await;
      delegate.as_mut().ok_or(Error::SessionClosed)?.commit().await
   }

   pub(crate) async fn rollback(&self) -> Result<()> {
      let mut delegate = self.inner.delegate.lock().await;
      delegate.as_mut().ok_or(Error::SessionClosed)?.rollback().await
   }

   /// Discard the current delegate and install the one `create` produces.
   ///
   /// The old delegate is discarded before `create` runs, so a factory with a
   /// single connection can hand that connection out again. If `create` fails
   /// the handle is left empty.
   pub(crate) async fn replace<F, Fut>(&self, create: F) -> Result<()>
   where
      F: FnOnce() -> Fut,
      Fut: Future<Output = Result<S>>,
   {
      let mut delegate = self.inner.delegate.lock().await;

      if let Some(stale) = delegate.take()
         && let Err(err) = stale.discard().await
      {
         warn!(unit = %self.inner.unit_name, error = %err, "Failed to discard stale session");
      }

      let replacement = create().await?;
      *delegate = Some(replacement);
      let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

      debug!(unit = %self.inner.unit_name, generation, "Replaced session delegate");
      Ok(())
   }

   /// Close the delegate. Closing an already closed handle is a no-op.
   pub(crate) async fn close(&self) -> Result<()> {
      let session = self.inner.delegate.lock().await.take();
      match session {
         Some(session) => {
            session.close().await?;
            debug!(unit = %self.inner.unit_name, "Session closed");
            Ok(())
         }
         None => Ok(()),
      }
   }
}

impl<S> Drop for HandleInner<S> {
   fn drop(&mut self) {
      // Only reachable when the transaction future was dropped mid-flight.
      // The session's own drop must not return an open transaction to a pool.
      if self.delegate.get_mut().is_some() {
         debug!(
            unit = %self.unit_name,
            "Dropping session handle without close"
         );
      }
   }
}

impl<S> fmt::Debug for SessionHandle<S> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("SessionHandle")
         .field("unit_name", &self.inner.unit_name)
         .field("adapter", &self.inner.adapter.name())
         .field("generation", &self.inner.generation.load(Ordering::SeqCst))
         .finish()
   }
}

/// Exclusive access to the delegate session.
///
/// Derefs to the provider session. [`connection`](Self::connection) borrows the
/// raw connection through the provider adapter.
pub struct SessionGuard<'a, S> {
   session: MappedMutexGuard<'a, S>,
   adapter: &'a dyn ProviderAdapter,
}

impl<S: Session> SessionGuard<'_, S> {
   /// Raw database connection of the session, for use with sqlx queries.
   ///
   /// Fails with [`Error::UnsupportedOperation`] when the adapter does not
   /// recognize the session.
   pub fn connection(&mut self) -> Result<&mut SqliteConnection> {
      let adapter = self.adapter;
      adapter.extract_connection(&mut *self.session)
   }
}

impl<S> Deref for SessionGuard<'_, S> {
   type Target = S;

   fn deref(&self) -> &Self::Target {
      &self.session
   }
}

impl<S> DerefMut for SessionGuard<'_, S> {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut self.session
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::adapter::GenericAdapter;
   use parking_lot::Mutex as SyncMutex;
   use std::any::Any;

   #[derive(Default)]
   struct Journal(SyncMutex<Vec<String>>);

   impl Journal {
      fn push(&self, entry: String) {
         self.0.lock().push(entry);
      }

      fn entries(&self) -> Vec<String> {
         self.0.lock().clone()
      }
   }

   struct FakeSession {
      id: u32,
      journal: Arc<Journal>,
   }

   impl Session for FakeSession {
      async fn begin(&mut self) -> Result<()> {
         self.journal.push(format!("begin#{}", self.id));
         Ok(())
      }

      async fn commit(&mut self) -> Result<()> {
         self.journal.push(format!("commit#{}", self.id));
         Ok(())
      }

      async fn rollback(&mut self) -> Result<()> {
         self.journal.push(format!("rollback#{}", self.id));
         Ok(())
      }

      async fn close(self) -> Result<()> {
         self.journal.push(format!("close#{}", self.id));
         Ok(())
      }

      async fn discard(self) -> Result<()> {
         self.journal.push(format!("discard#{}", self.id));
         Ok(())
      }
   }

   struct FakeAdapter;

   impl ProviderAdapter for FakeAdapter {
      fn name(&self) -> &'static str {
         "fake"
      }

      fn recognizes(&self, session: &dyn Any) -> bool {
         session.is::<FakeSession>()
      }
   }

   fn handle(journal: &Arc<Journal>) -> SessionHandle<FakeSession> {
      let session = FakeSession {
         id: 1,
         journal: Arc::clone(journal),
      };
      SessionHandle::new(session, Arc::new(FakeAdapter), Arc::from("orders"))
   }

   #[tokio::test]
   async fn test_operations_forward_to_delegate() {
      let journal = Arc::new(Journal::default());
      let handle = handle(&journal);

      handle.begin().await.unwrap();
      handle.commit().await.unwrap();
      handle.close().await.unwrap();

      assert_eq!(journal.entries(), vec!["begin#1", "commit#1", "close#1"]);
   }

   #[tokio::test]
   async fn test_replace_discards_before_creating() {
      let journal = Arc::new(Journal::default());
      let handle = handle(&journal);
      let for_create = Arc::clone(&journal);

      handle
         .replace(|| async move {
            for_create.push("create#2".into());
            Ok(FakeSession {
               id: 2,
               journal: for_create,
            })
         })
         .await
         .unwrap();

      handle.begin().await.unwrap();

      assert_eq!(journal.entries(), vec!["discard#1", "create#2", "begin#2"]);
      assert_eq!(handle.generation(), 1);
   }

   #[tokio::test]
   async fn test_failed_replace_leaves_handle_empty() {
      let journal = Arc::new(Journal::default());
      let handle = handle(&journal);

      let err = handle
         .replace(|| async { Err::<FakeSession, _>(Error::Sqlx(sqlx::Error::PoolTimedOut)) })
         .await
         .unwrap_err();
      assert!(matches!(err, Error::Sqlx(sqlx::Error::PoolTimedOut)));

      assert!(!handle.is_open().await);
      assert!(matches!(handle.begin().await, Err(Error::SessionClosed)));
      assert_eq!(handle.generation(), 0);
   }

   #[tokio::test]
   async fn test_lock_after_close_fails() {
      let journal = Arc::new(Journal::default());
      let handle = handle(&journal);

      {
         let guard = handle.lock().await.unwrap();
         assert_eq!(guard.id, 1);
      }

      handle.close().await.unwrap();
      assert!(matches!(handle.lock().await, Err(Error::SessionClosed)));

      // Closing twice does not touch the (gone) delegate again
      handle.close().await.unwrap();
      assert_eq!(journal.entries(), vec!["close#1"]);
   }

   #[tokio::test]
   async fn test_connection_requires_recognizing_adapter() {
      let journal = Arc::new(Journal::default());
      let session = FakeSession {
         id: 1,
         journal: Arc::clone(&journal),
      };
      let handle = SessionHandle::new(session, Arc::new(GenericAdapter), Arc::from("orders"));

      let mut guard = handle.lock().await.unwrap();
      let err = guard.connection().unwrap_err();
      assert_eq!(err.error_code(), "UNSUPPORTED_OPERATION");
   }

   #[tokio::test]
   async fn test_clones_share_delegate() {
      let journal = Arc::new(Journal::default());
      let handle = handle(&journal);
      let clone = handle.clone();

      clone.close().await.unwrap();
      assert!(!handle.is_open().await);
      assert_eq!(handle.unit_name(), "orders");
      assert_eq!(handle.adapter().name(), "fake");
   }
}
