//! Provider adapters and the catalog used to discover them.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use sqlx::sqlite::SqliteConnection;
use tracing::trace;

use crate::sqlite::SqliteAdapter;
use crate::{Error, Result};

/// Capabilities the connector needs from a persistence-engine family.
///
/// Adapters are immutable and shared between every connector and session
/// handle that uses them.
pub trait ProviderAdapter: Send + Sync + 'static {
   /// Stable name of the provider family, e.g. `"sqlite"`.
   fn name(&self) -> &'static str;

   /// Whether `session` is a session of this provider.
   fn recognizes(&self, session: &dyn Any) -> bool;

   /// Borrow the raw database connection behind a recognized session.
   fn extract_connection<'s>(&self, _session: &'s mut dyn Any) -> Result<&'s mut SqliteConnection> {
      Err(Error::UnsupportedOperation {
         adapter: self.name(),
         operation: "extract_connection",
      })
   }

   /// Whether `error` means the session's connection went stale and a fresh
   /// session is worth one more attempt.
   fn is_reconnectable(&self, _error: &Error) -> bool {
      false
   }
}

impl fmt::Debug for dyn ProviderAdapter {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("ProviderAdapter")
         .field("name", &self.name())
         .finish()
   }
}

/// Fallback adapter for sessions no registered provider recognizes.
///
/// Never reconnects and cannot extract connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericAdapter;

impl ProviderAdapter for GenericAdapter {
   fn name(&self) -> &'static str {
      "generic"
   }

   fn recognizes(&self, _session: &dyn Any) -> bool {
      false
   }
}

static GLOBAL_CATALOG: LazyLock<AdapterCatalog> = LazyLock::new(AdapterCatalog::default);

/// Ordered set of available provider adapters.
///
/// The global catalog starts with every adapter this crate ships. Connectors
/// built without an explicit adapter ask their catalog for the first adapter
/// that recognizes their first session.
#[derive(Clone)]
pub struct AdapterCatalog {
   adapters: Arc<RwLock<Vec<Arc<dyn ProviderAdapter>>>>,
}

impl Default for AdapterCatalog {
   fn default() -> Self {
      let catalog = Self::empty();
      catalog.register(Arc::new(SqliteAdapter));
      catalog
   }
}

impl AdapterCatalog {
   /// The process-wide catalog.
   pub fn global() -> &'static AdapterCatalog {
      &GLOBAL_CATALOG
   }

   /// A catalog without any adapters.
   pub fn empty() -> Self {
      Self {
         adapters: Arc::new(RwLock::new(Vec::new())),
      }
   }

   /// Adds an adapter. Adapters registered earlier win when several recognize a session.
   pub fn register(&self, adapter: Arc<dyn ProviderAdapter>) {
      trace!(adapter = adapter.name(), "Registering provider adapter");
      self.adapters.write().push(adapter);
   }

   /// Snapshot of the registered adapters in registration order.
   pub fn adapters(&self) -> Vec<Arc<dyn ProviderAdapter>> {
      self.adapters.read().clone()
   }

   /// First adapter that recognizes `session`.
   pub fn find(&self, session: &dyn Any) -> Option<Arc<dyn ProviderAdapter>> {
      self
         .adapters
         .read()
         .iter()
         .find(|adapter| adapter.recognizes(session))
         .cloned()
   }

   /// Adapter registered under `name`.
   pub fn by_name(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
      self
         .adapters
         .read()
         .iter()
         .find(|adapter| adapter.name() == name)
         .cloned()
   }
}

impl fmt::Debug for AdapterCatalog {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let names: Vec<&'static str> = self.adapters.read().iter().map(|a| a.name()).collect();
      f.debug_struct("AdapterCatalog").field("adapters", &names).finish()
   }
}
