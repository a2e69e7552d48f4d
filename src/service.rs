//! Create/update/delete/toggle orchestration over the loader, registry
//! and persistence gateway.
//!
//! Commit discipline: validation (rewrite, load, classify) happens
//! strictly before any persistence or registry mutation, so a failed
//! attempt leaves both exactly as they were. Hosts are expected to gate
//! `create`/`update`/`delete` and the admin valve tier behind their
//! admin role; toggles and the user valve tier behind any verified
//! user.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{NotFoundError, ValidationError};
use crate::loader::{ModuleHandle, ModuleLoader};
use crate::logging::log_event;
use crate::registry::FunctionRegistry;
use crate::rewrite::ImportRewriter;
use crate::store::{epoch_seconds, FunctionMeta, FunctionRecord, FunctionStore, FunctionUpdate};
use crate::valves::ValveManager;

#[derive(Clone, Debug, Deserialize)]
pub struct FunctionForm {
    pub id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub struct FunctionService {
    store: Arc<dyn FunctionStore>,
    registry: FunctionRegistry,
    loader: Arc<ModuleLoader>,
    rewriter: ImportRewriter,
    valves: ValveManager,
    data_dir: PathBuf,
}

impl FunctionService {
    pub fn new(store: Arc<dyn FunctionStore>, data_dir: PathBuf) -> Self {
        let registry = FunctionRegistry::new();
        let loader = Arc::new(ModuleLoader::new());
        let valves = ValveManager::new(store.clone(), registry.clone(), loader.clone());
        Self {
            store,
            registry,
            loader,
            rewriter: ImportRewriter::default(),
            valves,
            data_dir,
        }
    }

    /// Data directory under the platform default location.
    pub fn with_default_data_dir(store: Arc<dyn FunctionStore>) -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("plugin-kernel");
        Self::new(store, base)
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn valves(&self) -> &ValveManager {
        &self.valves
    }

    pub fn get(&self, id: &str) -> Option<FunctionRecord> {
        self.store.get(id)
    }

    pub fn list(&self) -> Vec<FunctionRecord> {
        self.store.list()
    }

    /// Per-function local storage, keyed by id.
    pub fn function_dir(&self, id: &str) -> PathBuf {
        self.data_dir.join("functions").join(id)
    }

    /// Cached handle, loading lazily from persisted content on a miss.
    /// This is the path the dispatch pipeline uses per request.
    pub fn ensure_loaded(&self, id: &str) -> Result<Arc<ModuleHandle>> {
        self.registry
            .get_or_load(id, self.store.as_ref(), &self.loader)
    }

    pub fn create(&self, owner_user_id: &str, form: FunctionForm) -> Result<FunctionRecord> {
        let id = form.id.trim().to_lowercase();
        validate_id(&id)?;
        if self.store.get(&id).is_some() {
            return Err(crate::error::DuplicateError(id).into());
        }

        let content = self.rewriter.rewrite(&form.content);
        let handle = self.loader.load(&id, &content).map_err(|err| {
            log_event(
                "warn",
                "function rejected at load",
                &[
                    ("function", Value::String(id.clone())),
                    ("kind", Value::String(err.kind.as_str().to_string())),
                ],
            );
            anyhow::Error::new(err)
        })?;

        let now = epoch_seconds();
        let record = FunctionRecord {
            id: id.clone(),
            owner_user_id: owner_user_id.to_string(),
            name: form.name,
            kind: handle.kind,
            content,
            meta: FunctionMeta {
                description: form.description,
                manifest: handle.frontmatter.clone(),
            },
            is_active: false,
            is_global: false,
            created_at: now,
            updated_at: now,
        };
        // Insert first: a racing create loses here and the registry
        // stays untouched for the loser.
        let record = self.store.insert(record)?;
        self.registry.set(Arc::new(handle));

        let dir = self.function_dir(&id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("unable to provision storage dir {}", dir.display()))?;

        log_event(
            "info",
            "function created",
            &[
                ("function", Value::String(id)),
                ("type", Value::String(record.kind.as_str().to_string())),
            ],
        );
        Ok(record)
    }

    pub fn update(&self, id: &str, form: FunctionForm) -> Result<FunctionRecord> {
        let existing = self
            .store
            .get(id)
            .ok_or_else(|| NotFoundError(format!("function `{id}`")))?;

        let content = self.rewriter.rewrite(&form.content);
        let handle = self.loader.load(id, &content).map_err(anyhow::Error::new)?;

        let update = FunctionUpdate {
            name: Some(form.name),
            content: Some(content),
            kind: Some(handle.kind),
            meta: Some(FunctionMeta {
                description: form.description.or(existing.meta.description),
                manifest: handle.frontmatter.clone(),
            }),
            ..FunctionUpdate::default()
        };
        let record = self
            .store
            .update(id, update)
            .ok_or_else(|| NotFoundError(format!("function `{id}`")))?;
        // Replace the stale handle before returning so the new content
        // is served immediately.
        self.registry.set(Arc::new(handle));

        log_event(
            "info",
            "function updated",
            &[("function", Value::String(id.to_string()))],
        );
        Ok(record)
    }

    /// Removes the record, the cached handle and the per-function
    /// storage directory.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete(id);
        if removed {
            self.registry.evict(id);
            remove_dir_best_effort(&self.function_dir(id), id);
            log_event(
                "info",
                "function deleted",
                &[("function", Value::String(id.to_string()))],
            );
        }
        Ok(removed)
    }

    /// Flips participation in the request pipeline. Independent of load
    /// state: a broken function can still be switched off.
    pub fn toggle_active(&self, id: &str) -> Result<FunctionRecord> {
        let record = self
            .store
            .get(id)
            .ok_or_else(|| NotFoundError(format!("function `{id}`")))?;
        self.store
            .update(
                id,
                FunctionUpdate {
                    is_active: Some(!record.is_active),
                    ..FunctionUpdate::default()
                },
            )
            .ok_or_else(|| NotFoundError(format!("function `{id}`")).into())
    }

    /// Flips visibility to users other than the owner.
    pub fn toggle_global(&self, id: &str) -> Result<FunctionRecord> {
        let record = self
            .store
            .get(id)
            .ok_or_else(|| NotFoundError(format!("function `{id}`")))?;
        self.store
            .update(
                id,
                FunctionUpdate {
                    is_global: Some(!record.is_global),
                    ..FunctionUpdate::default()
                },
            )
            .ok_or_else(|| NotFoundError(format!("function `{id}`")).into())
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ValidationError(
            "id may only contain lowercase letters, digits and underscores".to_string(),
        )
        .into());
    }
    Ok(())
}

fn remove_dir_best_effort(dir: &Path, id: &str) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            log_event(
                "warn",
                "unable to remove function storage dir",
                &[
                    ("function", Value::String(id.to_string())),
                    ("error", Value::String(err.to_string())),
                ],
            );
        }
    }
}
