use std::io::{stderr, stdout, Write};

use humantime::format_rfc3339;
use serde_json::{Map, Value};

const ALLOWED_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "fatal"];

fn current_timestamp() -> String {
    let now = std::time::SystemTime::now();
    format_rfc3339(now).to_string()
}

fn write_entry(entry: &Map<String, Value>) {
    if let Ok(serialized) = serde_json::to_string(entry) {
        let level = entry
            .get("level")
            .and_then(|v| v.as_str())
            .unwrap_or("info");
        if matches!(level, "error" | "fatal") {
            let _ = writeln!(stderr(), "{}", serialized);
        } else {
            let _ = writeln!(stdout(), "{}", serialized);
        }
    }
}

/// Emit one structured log line. Tags keep only scalar values; anything
/// else is dropped rather than rejected, since logging must stay
/// best-effort.
pub fn log_event(level: &str, message: &str, tags: &[(&str, Value)]) {
    let level = if ALLOWED_LEVELS.contains(&level) {
        level
    } else {
        "info"
    };

    let mut entry = Map::new();
    entry.insert("level".to_string(), Value::String(level.to_string()));
    entry.insert("message".to_string(), Value::String(message.to_string()));
    entry.insert(
        "timestamp".to_string(),
        Value::String(current_timestamp()),
    );

    let mut stable = Map::new();
    for (key, value) in tags {
        match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                stable.insert((*key).to_string(), value.clone());
            }
            _ => {}
        }
    }
    if !stable.is_empty() {
        entry.insert("tags".to_string(), Value::Object(stable));
    }

    write_entry(&entry);
}
