//! # sqlx-sqlite-session-factory
//!
//! A long-lived SQLite session factory built on SQLx. Sessions are the unit-of-work
//! scope a transaction runs in; the factory owns the connection pool they come from.
//!
//! ## Core Types
//!
//! - **[`SqliteSessionFactory`]**: Opens the database and hands out sessions
//! - **[`SqliteSession`]**: Exclusive write connection with explicit transaction control
//! - **[`SessionFactoryConfig`]**: Configuration for pool timeouts
//! - **[`Error`]**: Error type for factory and session operations
//!
//! ## Architecture
//!
//! - **Single writer**: The pool holds one read-write connection, so sessions are serialized
//! - **Lazy WAL mode**: Write-Ahead Logging enabled when the first session is created
//! - **Stale connection recovery**: [`SqliteSession::discard`] closes the physical
//!   connection so the next session reconnects
//!
//! ## Usage
//!
//! ```no_run
//! use sqlx_sqlite_session_factory::SqliteSessionFactory;
//!
//! #[tokio::main]
//! async fn main() -> sqlx_sqlite_session_factory::Result<()> {
//!     let factory = SqliteSessionFactory::connect("example.db", None).await?;
//!
//!     let mut session = factory.create_session().await?;
//!     session.begin_immediate().await?;
//!     sqlx::query("INSERT INTO users (name) VALUES (?)")
//!         .bind("Alice")
//!         .execute(&mut *session)
//!         .await?;
//!     session.commit().await?;
//!     session.release().await?;
//!
//!     // Close when done
//!     factory.close().await?;
//!     Ok(())
//! }
//! ```
//!
mod config;
mod error;
mod factory;
mod session;

// Re-export public types
pub use config::SessionFactoryConfig;
pub use error::Error;
pub use factory::SqliteSessionFactory;
pub use session::SqliteSession;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
