//! In-memory service registry.

use serverless_env::{AnyService, EnvError, ServiceRegistry};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

struct Entry {
    type_id: TypeId,
    type_name: &'static str,
    service: AnyService,
}

/// Name-keyed registry of provisioned services.
///
/// A name can be registered once; a second registration fails and leaves the
/// existing entry untouched.
#[derive(Default)]
pub struct SimRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl SimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Type name recorded for `name`, if registered.
    pub fn type_name_of(&self, name: &str) -> Option<&'static str> {
        self.lock().get(name).map(|entry| entry.type_name)
    }
}

impl ServiceRegistry for SimRegistry {
    fn register_any(
        &self,
        name: &str,
        type_id: TypeId,
        type_name: &'static str,
        service: AnyService,
    ) -> Result<(), EnvError> {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(name) {
            return Err(EnvError::already_registered(format!(
                "{} (as {})",
                name, existing.type_name
            )));
        }

        debug!("Registered {} as {}", name, type_name);
        entries.insert(
            name.to_string(),
            Entry {
                type_id,
                type_name,
                service,
            },
        );
        Ok(())
    }

    fn resolve_any(&self, name: &str, type_id: TypeId) -> Option<AnyService> {
        self.lock()
            .get(name)
            .filter(|entry| entry.type_id == type_id)
            .map(|entry| entry.service.clone())
    }

    fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }
}

impl std::fmt::Debug for SimRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimRegistry").field("names", &self.names()).finish()
    }
}
