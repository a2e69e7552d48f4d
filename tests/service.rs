use std::sync::Arc;

use plugin_kernel::{
    DuplicateError, FunctionForm, FunctionService, FunctionStore, LoadError, LoadErrorKind,
    MemoryStore, NotFoundError, ValidationError,
};

const PIPE_SRC: &str = r#"/*
 * title: Echo Pipe
*/
({ pipe(body) { return body; } })"#;

const FILTER_SRC: &str = "({ inlet(body) { return body; } })";

struct Fixture {
    service: FunctionService,
    store: Arc<MemoryStore>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryStore::new());
    let service = FunctionService::new(store.clone(), dir.path().to_path_buf());
    Fixture {
        service,
        store,
        _dir: dir,
    }
}

fn form(id: &str, content: &str) -> FunctionForm {
    FunctionForm {
        id: id.to_string(),
        name: format!("{id} function"),
        content: content.to_string(),
        description: None,
    }
}

#[test]
fn create_persists_record_registry_entry_and_storage_dir() {
    let fx = fixture();
    let record = fx
        .service
        .create("admin", form("echo", PIPE_SRC))
        .expect("create");

    assert_eq!(record.id, "echo");
    assert_eq!(record.kind.as_str(), "pipe");
    assert_eq!(
        record.meta.manifest.get("title").and_then(|v| v.as_str()),
        Some("Echo Pipe")
    );
    assert!(!record.is_active);
    assert!(!record.is_global);
    assert!(fx.service.registry().get("echo").is_some());
    assert!(fx.service.function_dir("echo").is_dir());
}

#[test]
fn create_lowercases_the_submitted_id() {
    let fx = fixture();
    let record = fx
        .service
        .create("admin", form("Echo_2", PIPE_SRC))
        .expect("create");
    assert_eq!(record.id, "echo_2");
}

#[test]
fn invalid_id_leaves_no_trace() {
    let fx = fixture();
    let err = fx
        .service
        .create("admin", form("not-valid!", PIPE_SRC))
        .expect_err("bad id");
    assert!(err.is::<ValidationError>());
    assert!(fx.store.get("not-valid!").is_none());
    assert!(fx.service.registry().ids().is_empty());
}

#[test]
fn duplicate_create_fails_and_state_is_unchanged() {
    let fx = fixture();
    let first = fx
        .service
        .create("admin", form("x", PIPE_SRC))
        .expect("first create");

    let err = fx
        .service
        .create("admin", form("x", FILTER_SRC))
        .expect_err("duplicate");
    assert!(err.is::<DuplicateError>());

    let stored = fx.store.get("x").expect("record kept");
    assert_eq!(stored.content, first.content);
    assert_eq!(stored.updated_at, first.updated_at);
    let cached = fx.service.registry().get("x").expect("handle kept");
    assert!(cached.source.contains("pipe(body)"));
}

#[test]
fn missing_entry_point_blocks_create_entirely() {
    let fx = fixture();
    let err = fx
        .service
        .create("admin", form("noop", "({ helper() { return 1; } })"))
        .expect_err("no entry point");
    let load = err.downcast_ref::<LoadError>().expect("load error");
    assert_eq!(load.kind, LoadErrorKind::MissingEntryPoint);
    assert!(fx.store.get("noop").is_none());
    assert!(fx.service.registry().get("noop").is_none());
}

#[test]
fn update_serves_the_new_handle_immediately() {
    let fx = fixture();
    fx.service
        .create("admin", form("f", PIPE_SRC))
        .expect("create");

    fx.service
        .update("f", form("f", "({ pipe(body) { return { v: 2 }; } })"))
        .expect("update");

    let handle = fx.service.registry().get("f").expect("cached");
    assert!(handle.source.contains("{ v: 2 }"));
    let record = fx.store.get("f").expect("record");
    assert!(record.content.contains("{ v: 2 }"));
}

#[test]
fn failed_update_keeps_old_record_and_handle() {
    let fx = fixture();
    fx.service
        .create("admin", form("f", PIPE_SRC))
        .expect("create");

    let err = fx
        .service
        .update("f", form("f", "({ pipe(body) { return body; }"))
        .expect_err("syntax error");
    let load = err.downcast_ref::<LoadError>().expect("load error");
    assert_eq!(load.kind, LoadErrorKind::Syntax);

    let record = fx.store.get("f").expect("record kept");
    assert!(record.content.contains("return body; } })"));
    let handle = fx.service.registry().get("f").expect("handle kept");
    assert!(handle.source.contains("return body; } })"));
}

#[test]
fn update_of_unknown_function_is_not_found() {
    let fx = fixture();
    let err = fx
        .service
        .update("ghost", form("ghost", PIPE_SRC))
        .expect_err("unknown id");
    assert!(err.is::<NotFoundError>());
}

#[test]
fn delete_removes_record_handle_and_storage_dir() {
    let fx = fixture();
    fx.service
        .create("admin", form("f", PIPE_SRC))
        .expect("create");
    let dir = fx.service.function_dir("f");
    assert!(dir.is_dir());

    assert!(fx.service.delete("f").expect("delete"));
    assert!(fx.store.get("f").is_none());
    assert!(fx.service.registry().get("f").is_none());
    assert!(!dir.exists());
    assert!(!fx.service.delete("f").expect("second delete"));
}

#[test]
fn toggles_flip_independently_and_round_trip() {
    let fx = fixture();
    let created = fx
        .service
        .create("admin", form("f", PIPE_SRC))
        .expect("create");

    let on = fx.service.toggle_active("f").expect("toggle on");
    assert!(on.is_active);
    assert!(!on.is_global);

    let global = fx.service.toggle_global("f").expect("toggle global");
    assert!(global.is_active);
    assert!(global.is_global);

    let off = fx.service.toggle_active("f").expect("toggle off");
    assert_eq!(off.is_active, created.is_active);
    assert!(off.is_global);
    assert_eq!(off.content, created.content);
    assert_eq!(off.name, created.name);
}

#[test]
fn ensure_loaded_repopulates_after_restart() {
    let fx = fixture();
    fx.service
        .create("admin", form("f", PIPE_SRC))
        .expect("create");

    // A fresh service over the same store stands in for a restarted
    // process: the registry starts empty and fills on first access.
    let restarted = FunctionService::new(fx.store.clone(), fx._dir.path().to_path_buf());
    assert!(restarted.registry().get("f").is_none());
    let handle = restarted.ensure_loaded("f").expect("lazy load");
    assert_eq!(handle.kind.as_str(), "pipe");
    assert!(restarted.registry().get("f").is_some());
}

#[test]
fn imports_are_normalized_before_persisting() {
    let fx = fixture();
    let source =
        "(function() { const db = require('internal/db'); return { pipe(body) { return body; } }; })()";
    fx.service
        .create("admin", form("f", source))
        .expect("create");

    let record = fx.store.get("f").expect("record");
    assert!(record.content.contains("require('host/store')"));
    let handle = fx.service.registry().get("f").expect("handle");
    assert!(handle.source.contains("require('host/store')"));
}

#[test]
fn ensure_loaded_of_unknown_function_is_not_found() {
    let fx = fixture();
    let err = fx.service.ensure_loaded("ghost").expect_err("unknown id");
    assert!(err.is::<NotFoundError>());
}
