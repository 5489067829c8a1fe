//! Catalog of known service implementations.

use crate::error::{Error, Result};
use crate::service::contract::Service;
use crate::service::descriptor::ServiceDescriptor;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Function that constructs a fresh service object.
///
/// Receives the instance name (the descriptor name) so implementations can
/// tag their own logs.
pub type ServiceFactory = dyn Fn(&str) -> Arc<dyn Service> + Send + Sync;

struct Entry {
    descriptor: Arc<ServiceDescriptor>,
    factory: Arc<ServiceFactory>,
}

/// Catalog of service descriptors and their factories.
///
/// The registry is filled once at startup (built-in services plus whatever
/// the embedding program adds) and then asked to resolve the enabled list.
///
/// # Examples
///
/// ```
/// use service_host::service::ServiceRegistry;
///
/// let registry = ServiceRegistry::with_builtin_services().unwrap();
/// let resolved = registry.resolve(&["clock".to_string()]).unwrap();
/// assert_eq!(resolved[0].name(), "clock");
///
/// assert!(registry.resolve(&["nope".to_string()]).is_err());
/// ```
#[derive(Default)]
pub struct ServiceRegistry {
    entries: HashMap<String, Entry>,
    /// Registration order, for stable listings
    order: Vec<String>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in services
    pub fn with_builtin_services() -> Result<Self> {
        let mut registry = Self::new();
        crate::services::register_builtin(&mut registry)?;
        Ok(registry)
    }

    /// Add a descriptor and its factory to the catalog
    #[tracing::instrument(skip(self, descriptor, factory), fields(service = %descriptor.name()))]
    pub fn register<F>(&mut self, descriptor: ServiceDescriptor, factory: F) -> Result<()>
    where
        F: Fn(&str) -> Arc<dyn Service> + Send + Sync + 'static,
    {
        let name = descriptor.name().to_string();
        if self.entries.contains_key(&name) {
            tracing::error!("Service name already registered");
            return Err(Error::DuplicateService(name));
        }

        tracing::debug!("Registered service implementation");
        self.order.push(name.clone());
        self.entries.insert(
            name,
            Entry {
                descriptor: Arc::new(descriptor),
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    /// Resolve an ordered list of enabled names into descriptors.
    ///
    /// The result follows the order of `enabled`. Repeated names are
    /// collapsed to their first occurrence. If any name is unknown the
    /// whole resolution fails and lists every unknown name.
    #[tracing::instrument(skip(self))]
    pub fn resolve(&self, enabled: &[String]) -> Result<Vec<Arc<ServiceDescriptor>>> {
        let mut resolved: Vec<Arc<ServiceDescriptor>> = Vec::with_capacity(enabled.len());
        let mut unknown = Vec::new();

        for name in enabled {
            if resolved.iter().any(|d| d.name() == name) || unknown.contains(name) {
                tracing::warn!(service = %name, "Service listed more than once, ignoring repeat");
                continue;
            }
            match self.entries.get(name) {
                Some(entry) => resolved.push(Arc::clone(&entry.descriptor)),
                None => unknown.push(name.clone()),
            }
        }

        if !unknown.is_empty() {
            tracing::error!(unknown = ?unknown, "Enabled services are not registered");
            return Err(Error::UnknownService(unknown));
        }

        tracing::debug!(num_services = resolved.len(), "Resolved enabled services");
        Ok(resolved)
    }

    /// Construct a new service object for `name`
    pub fn instantiate(&self, name: &str) -> Result<Arc<dyn Service>> {
        self.entries
            .get(name)
            .map(|entry| (entry.factory)(name))
            .ok_or_else(|| Error::UnknownService(vec![name.to_string()]))
    }

    /// Descriptor for `name`, if registered
    pub fn descriptor(&self, name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.entries.get(name).map(|e| Arc::clone(&e.descriptor))
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, in registration order
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Number of registered implementations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.order)
            .finish()
    }
}
