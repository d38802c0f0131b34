//! SqliteSession wrapping the exclusive write connection

use sqlx::Sqlite;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteConnection;
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

use crate::Result;

/// A unit-of-work scope on the factory's single write connection
///
/// The session owns a pool connection for its whole lifetime, so only one
/// session per factory exists at a time. Transaction control is explicit:
/// call [`begin_immediate`](Self::begin_immediate) and then exactly one of
/// [`commit`](Self::commit) or [`rollback`](Self::rollback).
///
/// The session derefs to `SqliteConnection` allowing direct use with sqlx queries.
///
/// # Example
///
/// ```no_run
/// use sqlx_sqlite_session_factory::SqliteSessionFactory;
///
/// # async fn example() -> Result<(), sqlx_sqlite_session_factory::Error> {
/// let factory = SqliteSessionFactory::connect("test.db", None).await?;
/// let mut session = factory.create_session().await?;
/// session.begin_immediate().await?;
/// sqlx::query("INSERT INTO users (name) VALUES (?)")
///     .bind("Alice")
///     .execute(&mut *session)
///     .await?;
/// session.commit().await?;
/// session.release().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SqliteSession {
   conn: PoolConnection<Sqlite>,
   in_transaction: bool,
}

impl SqliteSession {
   pub(crate) fn new(conn: PoolConnection<Sqlite>) -> Self {
      Self {
         conn,
         in_transaction: false,
      }
   }

   /// Whether a transaction begun on this session is still open
   pub fn in_transaction(&self) -> bool {
      self.in_transaction
   }

   /// Begin an immediate transaction, taking the database write lock up front
   pub async fn begin_immediate(&mut self) -> Result<()> {
      sqlx::query("BEGIN IMMEDIATE")
         .execute(&mut *self.conn)
         .await?;
      self.in_transaction = true;
      Ok(())
   }

   /// Commit the current transaction
   pub async fn commit(&mut self) -> Result<()> {
      sqlx::query("COMMIT").execute(&mut *self.conn).await?;
      self.in_transaction = false;
      Ok(())
   }

   /// Rollback the current transaction
   ///
   /// Does nothing when no transaction is open, e.g. after a failed begin.
   pub async fn rollback(&mut self) -> Result<()> {
      if !self.in_transaction {
         return Ok(());
      }

      sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
      self.in_transaction = false;
      Ok(())
   }

   /// Return the connection to the pool
   ///
   /// A connection must never go back to the pool with a transaction still
   /// open, so in that case it is closed instead.
   pub async fn release(self) -> Result<()> {
      if self.in_transaction {
         warn!("Releasing session with an open transaction, closing its connection");
         return self.discard().await;
      }

      // Drop returns the PoolConnection to the pool
      Ok(())
   }

   /// Close the physical connection instead of returning it to the pool
   ///
   /// Used when the connection is suspected to be stale. The pool finishes the
   /// close in the background and the next session opens a fresh connection
   /// once it is done.
   pub async fn discard(mut self) -> Result<()> {
      debug!("Discarding session connection");
      self.conn.close_on_drop();
      Ok(())
   }
}

impl Drop for SqliteSession {
   fn drop(&mut self) {
      // Also reached when a caller drops the session mid-transaction (e.g. a
      // cancelled future). A pooled connection would keep the open transaction.
      if self.in_transaction {
         debug!("Session dropped with an open transaction, closing its connection");
         self.conn.close_on_drop();
      }
   }
}

impl Deref for SqliteSession {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      &self.conn
   }
}

impl DerefMut for SqliteSession {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut self.conn
   }
}
