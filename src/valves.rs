//! Valve configuration: typed schemas declared by a module and the
//! manager that merges stored values with partial updates.
//!
//! A module declares `valves` (admin tier) and/or `userValves` (per-user
//! tier) as descriptor objects: `{ field: { type, default, description } }`.
//! The manager renders a JSON-schema-like spec for UI consumption and
//! validates every update against the schema of the *currently loaded*
//! handle, loading lazily through the registry when no handle is cached.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};

use crate::error::{NotFoundError, ValidationError};
use crate::loader::{ModuleHandle, ModuleLoader};
use crate::registry::FunctionRegistry;
use crate::store::FunctionStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValveKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ValveKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ValveKind::String),
            "integer" => Some(ValveKind::Integer),
            "number" => Some(ValveKind::Number),
            "boolean" => Some(ValveKind::Boolean),
            "array" => Some(ValveKind::Array),
            "object" => Some(ValveKind::Object),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValveKind::String => "string",
            ValveKind::Integer => "integer",
            ValveKind::Number => "number",
            ValveKind::Boolean => "boolean",
            ValveKind::Array => "array",
            ValveKind::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ValveKind::String => value.is_string(),
            ValveKind::Integer => value.is_i64() || value.is_u64(),
            ValveKind::Number => value.is_number(),
            ValveKind::Boolean => value.is_boolean(),
            ValveKind::Array => value.is_array(),
            ValveKind::Object => value.is_object(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ValveField {
    pub name: String,
    pub kind: ValveKind,
    pub default: Value,
    pub description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ValveSchema {
    pub title: String,
    pub fields: Vec<ValveField>,
}

impl ValveSchema {
    /// Build a schema from the descriptor object a module declared.
    /// Rejects unknown type names and defaults that contradict the
    /// declared type.
    pub fn from_descriptor(title: &str, descriptor: &Value) -> Result<Self> {
        let map = descriptor
            .as_object()
            .ok_or_else(|| anyhow!("descriptor must be an object"))?;

        let mut fields = Vec::with_capacity(map.len());
        for (name, spec) in map {
            let spec = spec
                .as_object()
                .ok_or_else(|| anyhow!("field `{name}` must be an object"))?;
            let type_name = spec
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("field `{name}` is missing a `type`"))?;
            let kind = ValveKind::from_name(type_name)
                .ok_or_else(|| anyhow!("field `{name}` has unsupported type `{type_name}`"))?;
            let default = spec.get("default").cloned().unwrap_or(Value::Null);
            if !default.is_null() && !kind.matches(&default) {
                return Err(anyhow!(
                    "field `{name}` default does not match declared type `{type_name}`"
                ));
            }
            let description = spec
                .get("description")
                .and_then(Value::as_str)
                .map(String::from);
            fields.push(ValveField {
                name: name.clone(),
                kind,
                default,
                description,
            });
        }

        Ok(Self {
            title: title.to_string(),
            fields,
        })
    }

    /// JSON-schema-like rendering consumed by configuration UIs.
    pub fn spec(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = Map::new();
            prop.insert(
                "type".to_string(),
                Value::String(field.kind.as_str().to_string()),
            );
            if !field.default.is_null() {
                prop.insert("default".to_string(), field.default.clone());
            }
            if let Some(description) = &field.description {
                prop.insert(
                    "description".to_string(),
                    Value::String(description.clone()),
                );
            }
            properties.insert(field.name.clone(), Value::Object(prop));
        }
        json!({
            "title": self.title,
            "type": "object",
            "properties": Value::Object(properties),
        })
    }

    /// Declared defaults as a value object.
    pub fn defaults(&self) -> Value {
        let mut out = Map::new();
        for field in &self.fields {
            out.insert(field.name.clone(), field.default.clone());
        }
        Value::Object(out)
    }

    /// Merge a partial update over stored values (falling back to
    /// declared defaults). Null and absent fields are ignored; present
    /// fields must match their declared type; undeclared keys are
    /// dropped. Fails without partial effect.
    pub fn validate_update(&self, stored: &Value, update: &Value) -> Result<Value> {
        let update = update
            .as_object()
            .ok_or_else(|| ValidationError("valve update must be an object".to_string()))?;

        let mut merged = match self.defaults() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Value::Object(existing) = stored {
            for (key, value) in existing {
                merged.insert(key.clone(), value.clone());
            }
        }

        for field in &self.fields {
            let Some(value) = update.get(&field.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if !field.kind.matches(value) {
                return Err(ValidationError(format!(
                    "field `{}` expects {}",
                    field.name,
                    field.kind.as_str()
                ))
                .into());
            }
            merged.insert(field.name.clone(), value.clone());
        }

        Ok(Value::Object(merged))
    }
}

/// Two symmetric configuration tiers over the persistence gateway.
/// Every operation first ensures a loaded handle so values are always
/// checked against the schema of the current content.
#[derive(Clone)]
pub struct ValveManager {
    store: Arc<dyn FunctionStore>,
    registry: FunctionRegistry,
    loader: Arc<ModuleLoader>,
}

impl ValveManager {
    pub fn new(
        store: Arc<dyn FunctionStore>,
        registry: FunctionRegistry,
        loader: Arc<ModuleLoader>,
    ) -> Self {
        Self {
            store,
            registry,
            loader,
        }
    }

    fn handle(&self, id: &str) -> Result<Arc<ModuleHandle>> {
        self.registry
            .get_or_load(id, self.store.as_ref(), &self.loader)
    }

    fn admin_schema(&self, id: &str) -> Result<(Arc<ModuleHandle>, ValveSchema)> {
        let handle = self.handle(id)?;
        let schema = handle
            .valves
            .clone()
            .ok_or_else(|| NotFoundError(format!("function `{id}` declares no valves")))?;
        Ok((handle, schema))
    }

    fn user_schema(&self, id: &str) -> Result<(Arc<ModuleHandle>, ValveSchema)> {
        let handle = self.handle(id)?;
        let schema = handle
            .user_valves
            .clone()
            .ok_or_else(|| NotFoundError(format!("function `{id}` declares no user valves")))?;
        Ok((handle, schema))
    }

    pub fn valve_spec(&self, id: &str) -> Result<Value> {
        let (_, schema) = self.admin_schema(id)?;
        Ok(schema.spec())
    }

    pub fn get_valves(&self, id: &str) -> Result<Value> {
        let (_, schema) = self.admin_schema(id)?;
        match self.store.get_valves(id) {
            Some(stored) => Ok(stored),
            None => Ok(schema.defaults()),
        }
    }

    pub fn update_valves(&self, id: &str, update: &Value) -> Result<Value> {
        let (_, schema) = self.admin_schema(id)?;
        let stored = self.store.get_valves(id).unwrap_or(Value::Null);
        let merged = schema.validate_update(&stored, update)?;
        self.store.set_valves(id, merged.clone());
        Ok(merged)
    }

    pub fn user_valve_spec(&self, id: &str) -> Result<Value> {
        let (_, schema) = self.user_schema(id)?;
        Ok(schema.spec())
    }

    pub fn get_user_valves(&self, id: &str, user_id: &str) -> Result<Value> {
        let (_, schema) = self.user_schema(id)?;
        match self.store.get_user_valves(id, user_id) {
            Some(stored) => Ok(stored),
            None => Ok(schema.defaults()),
        }
    }

    pub fn update_user_valves(&self, id: &str, user_id: &str, update: &Value) -> Result<Value> {
        let (_, schema) = self.user_schema(id)?;
        let stored = self
            .store
            .get_user_valves(id, user_id)
            .unwrap_or(Value::Null);
        let merged = schema.validate_update(&stored, update)?;
        self.store.set_user_valves(id, user_id, merged.clone());
        Ok(merged)
    }
}
