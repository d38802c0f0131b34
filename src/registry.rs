//! Named connectors, so code can look up a persistence unit without holding
//! on to the connector that serves it.

use std::any::Any;
use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::connector::Connector;
use crate::session::SessionFactory;
use crate::{Error, Result};

static GLOBAL_REGISTRY: LazyLock<ConnectorRegistry> = LazyLock::new(ConnectorRegistry::new);

type ErasedConnector = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct Entries {
   connectors: IndexMap<String, ErasedConnector>,
   default: Option<String>,
}

/// Connectors by name, in registration order.
///
/// Connectors over different session factory types can share one registry;
/// lookups name the factory type they expect.
#[derive(Default)]
pub struct ConnectorRegistry {
   entries: RwLock<Entries>,
}

impl ConnectorRegistry {
   /// The process-wide registry.
   pub fn global() -> &'static ConnectorRegistry {
      &GLOBAL_REGISTRY
   }

   pub fn new() -> Self {
      Self::default()
   }

   /// Register `connector` under `name`, replacing any previous registration.
   ///
   /// The connector becomes the default when `is_default` is set or when no
   /// default exists yet.
   pub fn register<F: SessionFactory>(
      &self,
      name: impl Into<String>,
      connector: Arc<Connector<F>>,
      is_default: bool,
   ) -> Result<()> {
      let name = name.into();
      if name.trim().is_empty() {
         return Err(Error::InvalidArgument("connector name cannot be empty".into()));
      }

      let mut entries = self.entries.write();
      let replaced = entries
         .connectors
         .insert(name.clone(), connector as ErasedConnector)
         .is_some();

      if is_default || entries.default.is_none() {
         entries.default = Some(name.clone());
      }

      debug!(connector = %name, replaced, is_default, "Registered connector");
      Ok(())
   }

   /// Connector registered under `name`.
   pub fn get<F: SessionFactory>(&self, name: &str) -> Result<Arc<Connector<F>>> {
      let erased = self
         .entries
         .read()
         .connectors
         .get(name)
         .cloned()
         .ok_or_else(|| Error::ConnectorNotFound(name.to_string()))?;

      erased
         .downcast::<Connector<F>>()
         .map_err(|_| Error::ConnectorTypeMismatch(name.to_string()))
   }

   /// The default connector.
   pub fn default_connector<F: SessionFactory>(&self) -> Result<Arc<Connector<F>>> {
      let name = self.default_name().ok_or(Error::NoDefaultConnector)?;
      self.get(&name)
   }

   pub fn default_name(&self) -> Option<String> {
      self.entries.read().default.clone()
   }

   /// Remove the registration for `name`. Returns whether one existed.
   ///
   /// Does not close the connector.
   pub fn unregister(&self, name: &str) -> bool {
      let mut entries = self.entries.write();
      let removed = entries.connectors.shift_remove(name).is_some();

      if removed && entries.default.as_deref() == Some(name) {
         entries.default = None;
      }
      removed
   }

   pub fn contains(&self, name: &str) -> bool {
      self.entries.read().connectors.contains_key(name)
   }

   /// Registered names in registration order.
   pub fn names(&self) -> Vec<String> {
      self.entries.read().connectors.keys().cloned().collect()
   }
}

impl std::fmt::Debug for ConnectorRegistry {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      let entries = self.entries.read();
      f.debug_struct("ConnectorRegistry")
         .field("names", &entries.connectors.keys().collect::<Vec<_>>())
         .field("default", &entries.default)
         .finish()
   }
}
