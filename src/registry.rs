//! Process-wide cache of loaded module handles.
//!
//! Built explicitly at process start and handed to callers; never an
//! ambient singleton. Entries are never persisted: after a restart the
//! first access reloads from persisted content. Reads share the table;
//! writes swap a single `Arc` and release, with all interpreter work
//! done before the lock is taken, so an unrelated function's reload
//! never holds up other entries. Concurrent writes to the same id are
//! last-writer-wins.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;

use crate::error::NotFoundError;
use crate::loader::{ModuleHandle, ModuleLoader};
use crate::store::FunctionStore;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<ModuleHandle>>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<ModuleHandle>> {
        let inner = self.inner.read().expect("registry poisoned");
        inner.get(id).cloned()
    }

    /// Idempotent replace keyed by the handle's own id.
    pub fn set(&self, handle: Arc<ModuleHandle>) {
        let mut inner = self.inner.write().expect("registry poisoned");
        inner.insert(handle.id.clone(), handle);
    }

    pub fn evict(&self, id: &str) -> bool {
        let mut inner = self.inner.write().expect("registry poisoned");
        inner.remove(id).is_some()
    }

    pub fn ids(&self) -> Vec<String> {
        let inner = self.inner.read().expect("registry poisoned");
        inner.keys().cloned().collect()
    }

    /// Lazy population on cache miss: fetch persisted content and load
    /// it outside the lock. Two racing loaders both succeed; the later
    /// commit wins, which is fine since both loaded the same content.
    pub fn get_or_load(
        &self,
        id: &str,
        store: &dyn FunctionStore,
        loader: &ModuleLoader,
    ) -> Result<Arc<ModuleHandle>> {
        if let Some(handle) = self.get(id) {
            return Ok(handle);
        }
        let record = store
            .get(id)
            .ok_or_else(|| NotFoundError(format!("function `{id}`")))?;
        let handle = Arc::new(loader.load(id, &record.content)?);
        self.set(handle.clone());
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::FunctionRegistry;
    use crate::loader::ModuleLoader;

    #[test]
    fn set_replaces_and_evict_removes() {
        let loader = ModuleLoader::new();
        let registry = FunctionRegistry::new();

        let first = loader
            .load("f", "({ pipe(body) { return 1; } })")
            .expect("load");
        registry.set(Arc::new(first));
        let second = loader
            .load("f", "({ pipe(body) { return 2; } })")
            .expect("load");
        registry.set(Arc::new(second));

        let handle = registry.get("f").expect("cached");
        assert!(handle.source.contains("return 2"));
        assert!(registry.evict("f"));
        assert!(registry.get("f").is_none());
        assert!(!registry.evict("f"));
    }
}
