//! Collaborator boundary: the provider sessions a connector demarcates and the
//! factory that creates them.

use std::any::Any;
use std::future::Future;

use crate::Result;

/// A provider-specific unit-of-work scope against a database.
///
/// The connector drives exactly one `begin` followed by one `commit` or
/// `rollback`, then hands the session back with [`close`](Session::close).
/// Sessions that failed with a stale connection are thrown away with
/// [`discard`](Session::discard) instead.
///
/// `rollback` also follows a failed `begin` and must succeed when no
/// transaction is open. A session dropped without `close` (a cancelled
/// transaction) must not leave its transaction open on a shared connection.
pub trait Session: Any + Send + Sized {
   fn begin(&mut self) -> impl Future<Output = Result<()>> + Send;

   fn commit(&mut self) -> impl Future<Output = Result<()>> + Send;

   fn rollback(&mut self) -> impl Future<Output = Result<()>> + Send;

   /// Release the session after its transaction ended.
   fn close(self) -> impl Future<Output = Result<()>> + Send;

   /// Drop a session whose connection is no longer usable.
   fn discard(self) -> impl Future<Output = Result<()>> + Send {
      self.close()
   }
}

/// Long-lived source of sessions for one persistence unit.
///
/// Must be safe to call `create_session` from many tasks at once.
pub trait SessionFactory: Send + Sync + 'static {
   type Session: Session;

   fn create_session(&self) -> impl Future<Output = Result<Self::Session>> + Send;

   /// Release the factory's resources. Called at most once by the owning connector.
   fn close(&self) -> impl Future<Output = Result<()>> + Send;
}
