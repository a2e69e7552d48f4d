use plugin_kernel::{FunctionKind, LoadErrorKind, ModuleLoader, NotFoundError};
use serde_json::{json, Value};

const FILTER_SRC: &str = r#"/*
 * title: Rate Limit Filter
 * author: ops
 * version: 0.2
*/
({
    inlet(body) { body.filtered = true; return body; },
    pipe(body) { return body; }
})"#;

#[test]
fn filter_shapes_win_over_pipe() {
    let loader = ModuleLoader::new();
    let handle = loader.load("rate_limit", FILTER_SRC).expect("load");
    assert_eq!(handle.kind, FunctionKind::Filter);
    assert_eq!(handle.entry_points(), ["inlet", "pipe"]);
    assert_eq!(
        handle.frontmatter.get("title").and_then(Value::as_str),
        Some("Rate Limit Filter")
    );
    assert_eq!(
        handle.frontmatter.get("version").and_then(Value::as_str),
        Some("0.2")
    );
}

#[test]
fn action_and_pipe_classify_by_priority() {
    let loader = ModuleLoader::new();

    let action = loader
        .load("a", "({ action(body) { return body; }, pipe(body) { return body; } })")
        .expect("load");
    assert_eq!(action.kind, FunctionKind::Action);

    let pipe = loader
        .load("p", "({ pipe(body) { return body; } })")
        .expect("load");
    assert_eq!(pipe.kind, FunctionKind::Pipe);
}

#[test]
fn no_entry_point_is_a_missing_entry_point_error() {
    let loader = ModuleLoader::new();
    let err = loader
        .load("empty", "({ helper() { return 1; } })")
        .expect_err("no entry point");
    assert_eq!(err.kind, LoadErrorKind::MissingEntryPoint);
}

#[test]
fn syntax_error_keeps_frontmatter() {
    let loader = ModuleLoader::new();
    let source = "/*\n * title: Broken\n*/\n({ inlet(body) { return body; }";
    let err = loader.load("broken", source).expect_err("unterminated");
    assert_eq!(err.kind, LoadErrorKind::Syntax);
    assert_eq!(
        err.frontmatter.get("title").and_then(Value::as_str),
        Some("Broken")
    );
}

#[test]
fn thrown_error_during_evaluation_is_a_runtime_error() {
    let loader = ModuleLoader::new();
    let err = loader
        .load("boom", "(function() { throw new Error('boom'); })()")
        .expect_err("throws");
    assert_eq!(err.kind, LoadErrorKind::Runtime);
    assert!(err.detail.contains("boom"));
}

#[test]
fn unapproved_require_fails_at_load() {
    let loader = ModuleLoader::new();
    let source =
        "(function() { const x = require('somewhere-else'); return { pipe(b) { return b; } }; })()";
    let err = loader.load("imports", source).expect_err("unknown module");
    assert_eq!(err.kind, LoadErrorKind::Runtime);
    assert!(err.detail.contains("module not available"));
}

#[test]
fn approved_host_require_resolves() {
    let loader = ModuleLoader::new();
    let source =
        "(function() { const u = require('host/utils'); return { pipe(b) { return b; } }; })()";
    let handle = loader.load("imports", source).expect("load");
    assert_eq!(handle.kind, FunctionKind::Pipe);
}

#[test]
fn non_object_module_is_a_runtime_error() {
    let loader = ModuleLoader::new();
    let err = loader.load("scalar", "42").expect_err("not an object");
    assert_eq!(err.kind, LoadErrorKind::Runtime);
}

#[test]
fn invoke_runs_a_declared_entry_point() {
    let loader = ModuleLoader::new();
    let handle = loader
        .load(
            "echo",
            "({ pipe(body) { return { seen: body.value + 1 }; } })",
        )
        .expect("load");

    let result = handle
        .invoke("pipe", &json!({ "value": 41 }))
        .expect("invoke");
    assert_eq!(result, json!({ "seen": 42 }));
}

#[test]
fn invoke_rejects_undeclared_entry_points() {
    let loader = ModuleLoader::new();
    let handle = loader
        .load("echo", "({ pipe(body) { return body; } })")
        .expect("load");
    let err = handle
        .invoke("action", &json!({}))
        .expect_err("not declared");
    assert!(err.is::<NotFoundError>());
}

#[test]
fn valve_descriptors_become_schemas() {
    let loader = ModuleLoader::new();
    let source = r#"({
        valves: {
            threshold: { type: 'integer', default: 10, description: 'max per window' }
        },
        userValves: {
            verbose: { type: 'boolean', default: false }
        },
        pipe(body) { return body; }
    })"#;
    let handle = loader.load("valved", source).expect("load");

    let spec = handle.valves.as_ref().expect("valves").spec();
    assert_eq!(spec.get("title"), Some(&Value::String("Valves".into())));
    assert_eq!(
        spec.pointer("/properties/threshold/default"),
        Some(&json!(10))
    );
    assert_eq!(
        spec.pointer("/properties/threshold/description"),
        Some(&json!("max per window"))
    );
    assert!(handle.user_valves.is_some());
}

#[test]
fn bad_valve_descriptor_fails_the_load() {
    let loader = ModuleLoader::new();
    let source = "({ valves: { t: { type: 'decimal' } }, pipe(body) { return body; } })";
    let err = loader.load("badvalves", source).expect_err("bad descriptor");
    assert_eq!(err.kind, LoadErrorKind::Runtime);
    assert!(err.detail.contains("valves descriptor"));
}
