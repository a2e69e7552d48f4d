//! Compiles submitted function source into a [`ModuleHandle`].
//!
//! Source is a JavaScript expression that evaluates to an object. It is
//! compiled and probed inside a throwaway quick-js context; the host
//! keeps only the plain-data descriptor that comes back. Classification
//! scans the object for well-known entry points in fixed priority order
//! and the optional `valves` / `userValves` descriptors become typed
//! schemas. The loader never touches the registry; committing a handle
//! is the caller's decision.

use anyhow::{anyhow, Result};
use quick_js::{Context as JsContext, JsValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LoadError, LoadErrorKind, NotFoundError};
use crate::logging::log_event;
use crate::valves::ValveSchema;

const ENTRY_POINTS: [&str; 5] = ["inlet", "outlet", "stream", "action", "pipe"];

/// Only host-approved specifiers resolve; everything else fails the
/// load as a runtime error. The import rewriter upstream maps legacy
/// names onto the `host/*` namespace before source reaches here.
const REQUIRE_SHIM: &str = r#"
    const __host_modules = Object.create(null);
    globalThis.require = function(name) {
        if (name !== 'host' && !name.startsWith('host/')) {
            throw new Error('module not available: ' + name);
        }
        if (!__host_modules[name]) {
            __host_modules[name] = {};
        }
        return __host_modules[name];
    };
    null;
"#;

const CONSOLE_SHIM: &str = r#"
    globalThis.console = {
        log: (...args) => { globalThis.__host_console(...args); },
        info: (...args) => { globalThis.__host_console(...args); },
        warn: (...args) => { globalThis.__host_console(...args); },
        error: (...args) => { globalThis.__host_console(...args); },
        debug: (...args) => { globalThis.__host_console(...args); }
    };
    null;
"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    Filter,
    Action,
    Pipe,
}

impl FunctionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Filter => "filter",
            FunctionKind::Action => "action",
            FunctionKind::Pipe => "pipe",
        }
    }
}

/// In-memory result of a successful load. Plain data, safe to share
/// across request workers; re-entering the interpreter happens per
/// invocation through [`ModuleHandle::invoke`].
#[derive(Clone, Debug)]
pub struct ModuleHandle {
    pub id: String,
    pub kind: FunctionKind,
    pub frontmatter: Map<String, Value>,
    pub source: String,
    pub valves: Option<ValveSchema>,
    pub user_valves: Option<ValveSchema>,
    entries: Vec<String>,
}

impl ModuleHandle {
    pub fn entry_points(&self) -> &[String] {
        &self.entries
    }

    /// Call one declared entry point with a JSON payload. The module is
    /// re-evaluated in a fresh interpreter; console output is routed to
    /// the host log stream tagged with the function id.
    pub fn invoke(&self, entry: &str, payload: &Value) -> Result<Value> {
        if !self.entries.iter().any(|name| name == entry) {
            return Err(NotFoundError(format!(
                "entry point `{entry}` on function `{}`",
                self.id
            ))
            .into());
        }

        let context = JsContext::new()
            .map_err(|err| anyhow!("unable to create interpreter: {err}"))?;

        let function_id = self.id.clone();
        context
            .add_callback("__host_console", move |args: quick_js::Arguments| {
                let rendered = args
                    .into_vec()
                    .into_iter()
                    .map(format_js_value)
                    .collect::<Vec<_>>()
                    .join(" ");
                log_event(
                    "info",
                    &rendered,
                    &[("function", Value::String(function_id.clone()))],
                );
            })
            .map_err(|err| anyhow!("failed to register console bridge: {err}"))?;
        context
            .eval(CONSOLE_SHIM)
            .map_err(|err| anyhow!("failed to initialise console shim: {err}"))?;
        context
            .eval(REQUIRE_SHIM)
            .map_err(|err| anyhow!("failed to initialise require shim: {err}"))?;

        let payload_json = serde_json::to_string(payload)?;
        let payload_literal = serde_json::to_string(&payload_json)?;
        let body = expression_body(&self.source);
        let wrapper = format!(
            r#"(function() {{
    const mod = (
{body}
    );
    const payload = JSON.parse({payload_literal});
    const result = mod.{entry}(payload);
    return result === undefined ? null : result;
}})()"#
        );

        let value = context.eval(&wrapper).map_err(|err| {
            anyhow::Error::new(LoadError::new(LoadErrorKind::Runtime, err.to_string()))
        })?;
        Ok(js_value_to_json(value))
    }
}

#[derive(Default)]
pub struct ModuleLoader;

impl ModuleLoader {
    pub fn new() -> Self {
        Self
    }

    /// Compile and probe submitted source. Frontmatter is parsed before
    /// execution and attached to the error as well, so a broken
    /// function still lists with its declared metadata.
    pub fn load(&self, id: &str, source: &str) -> Result<ModuleHandle, LoadError> {
        let frontmatter = parse_frontmatter(source);
        match self.probe(id, source) {
            Ok(mut handle) => {
                handle.frontmatter = frontmatter;
                Ok(handle)
            }
            Err(err) => Err(err.with_frontmatter(frontmatter)),
        }
    }

    fn probe(&self, id: &str, source: &str) -> Result<ModuleHandle, LoadError> {
        let context = JsContext::new().map_err(|err| {
            LoadError::new(
                LoadErrorKind::Runtime,
                format!("unable to create interpreter: {err}"),
            )
        })?;

        // Compile-only pass: constructing a Function surfaces syntax
        // errors without running the module body.
        let literal = serde_json::to_string(expression_body(source)).map_err(|err| {
            LoadError::new(LoadErrorKind::Syntax, format!("unreadable source: {err}"))
        })?;
        context
            .eval(&format!(
                "new Function('return (' + {literal} + '\\n)'); null"
            ))
            .map_err(|err| LoadError::new(LoadErrorKind::Syntax, err.to_string()))?;

        context.eval(REQUIRE_SHIM).map_err(|err| {
            LoadError::new(
                LoadErrorKind::Runtime,
                format!("failed to initialise require shim: {err}"),
            )
        })?;

        let body = expression_body(source);
        let wrapper = format!(
            r#"(function() {{
    const mod = (
{body}
    );
    if (!mod || typeof mod !== 'object') {{
        throw new Error('function source must evaluate to an object');
    }}
    const descriptor = {{ entries: [] }};
    for (const name of ['inlet', 'outlet', 'stream', 'action', 'pipe']) {{
        if (typeof mod[name] === 'function') {{
            descriptor.entries.push(name);
        }}
    }}
    if (mod.valves && typeof mod.valves === 'object') {{
        descriptor.valves = mod.valves;
    }}
    if (mod.userValves && typeof mod.userValves === 'object') {{
        descriptor.userValves = mod.userValves;
    }}
    return descriptor;
}})()"#
        );

        let probed = context
            .eval(&wrapper)
            .map_err(|err| LoadError::new(LoadErrorKind::Runtime, err.to_string()))?;
        let descriptor = js_value_to_json(probed);

        let entries: Vec<String> = descriptor
            .get("entries")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let kind = classify(&entries).ok_or_else(|| {
            LoadError::new(
                LoadErrorKind::MissingEntryPoint,
                format!(
                    "function `{id}` declares none of {}",
                    ENTRY_POINTS.join(", ")
                ),
            )
        })?;

        let valves = match descriptor.get("valves") {
            Some(spec) => Some(ValveSchema::from_descriptor("Valves", spec).map_err(|err| {
                LoadError::new(
                    LoadErrorKind::Runtime,
                    format!("invalid valves descriptor: {err}"),
                )
            })?),
            None => None,
        };
        let user_valves = match descriptor.get("userValves") {
            Some(spec) => Some(ValveSchema::from_descriptor("UserValves", spec).map_err(
                |err| {
                    LoadError::new(
                        LoadErrorKind::Runtime,
                        format!("invalid userValves descriptor: {err}"),
                    )
                },
            )?),
            None => None,
        };

        Ok(ModuleHandle {
            id: id.to_string(),
            kind,
            frontmatter: Map::new(),
            source: source.to_string(),
            valves,
            user_valves,
            entries,
        })
    }
}

/// Entry-point priority is fixed: filter shapes win over action, action
/// over pipe.
fn classify(entries: &[String]) -> Option<FunctionKind> {
    if entries
        .iter()
        .any(|e| matches!(e.as_str(), "inlet" | "outlet" | "stream"))
    {
        return Some(FunctionKind::Filter);
    }
    if entries.iter().any(|e| e == "action") {
        return Some(FunctionKind::Action);
    }
    if entries.iter().any(|e| e == "pipe") {
        return Some(FunctionKind::Pipe);
    }
    None
}

/// Leading `/* ... */` block of `key: value` lines. Parsed without
/// executing anything, so it survives broken source.
pub fn parse_frontmatter(source: &str) -> Map<String, Value> {
    let mut out = Map::new();
    let trimmed = source.trim_start();
    let Some(rest) = trimmed.strip_prefix("/*") else {
        return out;
    };
    let Some(end) = rest.find("*/") else {
        return out;
    };
    for line in rest[..end].lines() {
        let line = line.trim().trim_start_matches('*').trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        out.insert(key.to_string(), Value::String(value.to_string()));
    }
    out
}

// Modules are expression-valued; a trailing semicolon from an editor
// would break the parenthesized wrapper, so shed it here.
fn expression_body(source: &str) -> &str {
    let trimmed = source.trim_end();
    trimmed.strip_suffix(';').unwrap_or(trimmed)
}

pub(crate) fn js_value_to_json(value: JsValue) -> Value {
    match value {
        JsValue::Null => Value::Null,
        JsValue::Undefined => Value::Null,
        JsValue::Bool(b) => Value::Bool(b),
        JsValue::Int(n) => Value::Number(serde_json::Number::from(n)),
        JsValue::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        JsValue::String(s) => Value::String(s),
        JsValue::Array(items) => Value::Array(items.into_iter().map(js_value_to_json).collect()),
        JsValue::Object(entries) => {
            let mut map = Map::new();
            for (key, val) in entries {
                map.insert(key, js_value_to_json(val));
            }
            Value::Object(map)
        }
        JsValue::__NonExhaustive => Value::Null,
    }
}

fn format_js_value(value: JsValue) -> String {
    match value {
        JsValue::Undefined => "undefined".to_string(),
        JsValue::Null => "null".to_string(),
        JsValue::Bool(b) => b.to_string(),
        JsValue::Int(n) => n.to_string(),
        JsValue::Float(f) => {
            if f.fract() == 0.0 {
                format!("{:.0}", f)
            } else {
                f.to_string()
            }
        }
        JsValue::String(s) => s,
        other => {
            let json = js_value_to_json(other);
            serde_json::to_string(&json).unwrap_or_else(|_| "[object]".to_string())
        }
    }
}
