//! Service discovery abstraction.

use crate::error::EnvError;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// A type-erased registered service.
pub type AnyService = Arc<dyn Any + Send + Sync>;

/// Sink where provisioned services are published for other components.
///
/// Entries are keyed by name; the registered type is recorded alongside so a
/// lookup with the wrong type misses instead of panicking. Collision policy
/// belongs to the implementation, which must reject a second registration
/// under an existing name.
///
/// The methods here are object-safe; use [`RegistryExt`] for typed access.
pub trait ServiceRegistry: Send + Sync {
    /// Registers a type-erased service under `name`.
    ///
    /// # Returns
    /// * `Ok(())` - The entry was written
    /// * `Err(EnvError::AlreadyRegistered)` - `name` is taken; nothing was written
    fn register_any(
        &self,
        name: &str,
        type_id: TypeId,
        type_name: &'static str,
        service: AnyService,
    ) -> Result<(), EnvError>;

    /// Looks up the service registered under `name` with the given type.
    fn resolve_any(&self, name: &str, type_id: TypeId) -> Option<AnyService>;

    /// Returns true if any service is registered under `name`.
    fn contains(&self, name: &str) -> bool;
}

/// Typed convenience layer over [`ServiceRegistry`].
pub trait RegistryExt: ServiceRegistry {
    /// Registers `service` under `name` as type `T`.
    fn register<T: Any + Send + Sync>(&self, name: &str, service: Arc<T>) -> Result<(), EnvError> {
        self.register_any(name, TypeId::of::<T>(), std::any::type_name::<T>(), service)
    }

    /// Resolves the `T` registered under `name`.
    fn resolve<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.resolve_any(name, TypeId::of::<T>())
            .and_then(|service| service.downcast::<T>().ok())
    }
}

impl<R: ServiceRegistry + ?Sized> RegistryExt for R {}
