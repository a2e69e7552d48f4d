//! Persistence gateway contract and the in-process reference store.
//!
//! The durable record store is an external collaborator; this module
//! pins down the trait the rest of the runtime consumes plus a
//! `MemoryStore` used by embedding hosts and tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DuplicateError;
use crate::loader::FunctionKind;

pub(crate) fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FunctionMeta {
    #[serde(default)]
    pub description: Option<String>,
    /// Key-value metadata parsed from the source frontmatter block.
    #[serde(default)]
    pub manifest: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub id: String,
    pub owner_user_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FunctionKind,
    /// Source text as persisted, post import-rewrite.
    pub content: String,
    pub meta: FunctionMeta,
    pub is_active: bool,
    pub is_global: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Partial update; `None` fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct FunctionUpdate {
    pub name: Option<String>,
    pub content: Option<String>,
    pub kind: Option<FunctionKind>,
    pub meta: Option<FunctionMeta>,
    pub is_active: Option<bool>,
    pub is_global: Option<bool>,
}

pub trait FunctionStore: Send + Sync {
    fn get(&self, id: &str) -> Option<FunctionRecord>;
    fn list(&self) -> Vec<FunctionRecord>;
    /// Fails with [`DuplicateError`] on id collision.
    fn insert(&self, record: FunctionRecord) -> Result<FunctionRecord>;
    fn update(&self, id: &str, update: FunctionUpdate) -> Option<FunctionRecord>;
    fn delete(&self, id: &str) -> bool;
    fn get_valves(&self, id: &str) -> Option<Value>;
    fn set_valves(&self, id: &str, values: Value);
    fn get_user_valves(&self, id: &str, user_id: &str) -> Option<Value>;
    fn set_user_valves(&self, id: &str, user_id: &str, values: Value);
}

#[derive(Default)]
struct MemoryInner {
    functions: HashMap<String, FunctionRecord>,
    valves: HashMap<String, Value>,
    user_valves: HashMap<(String, String), Value>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FunctionStore for MemoryStore {
    fn get(&self, id: &str) -> Option<FunctionRecord> {
        let inner = self.inner.lock().expect("store poisoned");
        inner.functions.get(id).cloned()
    }

    fn list(&self) -> Vec<FunctionRecord> {
        let inner = self.inner.lock().expect("store poisoned");
        let mut records: Vec<_> = inner.functions.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn insert(&self, record: FunctionRecord) -> Result<FunctionRecord> {
        let mut inner = self.inner.lock().expect("store poisoned");
        if inner.functions.contains_key(&record.id) {
            return Err(DuplicateError(record.id).into());
        }
        inner
            .functions
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update(&self, id: &str, update: FunctionUpdate) -> Option<FunctionRecord> {
        let mut inner = self.inner.lock().expect("store poisoned");
        let record = inner.functions.get_mut(id)?;
        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(content) = update.content {
            record.content = content;
        }
        if let Some(kind) = update.kind {
            record.kind = kind;
        }
        if let Some(meta) = update.meta {
            record.meta = meta;
        }
        if let Some(is_active) = update.is_active {
            record.is_active = is_active;
        }
        if let Some(is_global) = update.is_global {
            record.is_global = is_global;
        }
        record.updated_at = epoch_seconds();
        Some(record.clone())
    }

    fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("store poisoned");
        let removed = inner.functions.remove(id).is_some();
        if removed {
            inner.valves.remove(id);
            inner
                .user_valves
                .retain(|(function_id, _), _| function_id != id);
        }
        removed
    }

    fn get_valves(&self, id: &str) -> Option<Value> {
        let inner = self.inner.lock().expect("store poisoned");
        inner.valves.get(id).cloned()
    }

    fn set_valves(&self, id: &str, values: Value) {
        let mut inner = self.inner.lock().expect("store poisoned");
        inner.valves.insert(id.to_string(), values);
    }

    fn get_user_valves(&self, id: &str, user_id: &str) -> Option<Value> {
        let inner = self.inner.lock().expect("store poisoned");
        inner
            .user_valves
            .get(&(id.to_string(), user_id.to_string()))
            .cloned()
    }

    fn set_user_valves(&self, id: &str, user_id: &str, values: Value) {
        let mut inner = self.inner.lock().expect("store poisoned");
        inner
            .user_valves
            .insert((id.to_string(), user_id.to_string()), values);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{epoch_seconds, FunctionMeta, FunctionRecord, FunctionStore, MemoryStore};
    use crate::error::DuplicateError;
    use crate::loader::FunctionKind;

    fn record(id: &str) -> FunctionRecord {
        let now = epoch_seconds();
        FunctionRecord {
            id: id.to_string(),
            owner_user_id: "admin".to_string(),
            name: id.to_string(),
            kind: FunctionKind::Pipe,
            content: "({ pipe(body) { return body; } })".to_string(),
            meta: FunctionMeta::default(),
            is_active: false,
            is_global: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn insert_rejects_duplicate_id() {
        let store = MemoryStore::new();
        store.insert(record("x")).expect("first insert");
        let err = store.insert(record("x")).expect_err("second insert");
        assert!(err.is::<DuplicateError>());
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn delete_drops_valve_rows() {
        let store = MemoryStore::new();
        store.insert(record("f")).expect("insert");
        store.set_valves("f", json!({ "threshold": 5 }));
        store.set_user_valves("f", "u1", json!({ "verbose": true }));

        assert!(store.delete("f"));
        assert!(store.get("f").is_none());
        assert!(store.get_valves("f").is_none());
        assert!(store.get_user_valves("f", "u1").is_none());
        assert!(!store.delete("f"));
    }
}
