use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use plugin_kernel::{ImportRewriter, LoadError, ModuleLoader};
use serde_json::{json, Map, Value};

struct CliOptions {
    file: PathBuf,
    id: String,
}

fn parse_args() -> Result<CliOptions> {
    let mut args = env::args().skip(1);
    let mut file: Option<PathBuf> = None;
    let mut id: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--file" | "-f" => {
                let value = args.next().ok_or_else(|| anyhow!("--file requires a path"))?;
                file = Some(PathBuf::from(value));
            }
            "--id" => {
                let value = args.next().ok_or_else(|| anyhow!("--id requires a value"))?;
                id = Some(value);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                return Err(anyhow!("unknown argument: {other}"));
            }
        }
    }

    let file = file.ok_or_else(|| anyhow!("--file is required"))?;
    let id = id.unwrap_or_else(|| {
        file.file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "function".to_string())
    });

    Ok(CliOptions { file, id })
}

fn print_usage() {
    println!(
        "Usage: fnprobe --file path/to/function.js [--id name]\n\n\
         Rewrites imports, loads the function and prints its\n\
         classification, frontmatter and valve specs as JSON.\n\n\
         Options:\n  --file, -f   Path to function source (required)\n  --id         Function id (defaults to the file stem)\n  --help, -h   Show this message"
    );
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_args()?;
    let source = fs::read_to_string(&options.file)
        .with_context(|| format!("unable to read {}", options.file.display()))?;

    let rewritten = ImportRewriter::default().rewrite(&source);
    let loader = ModuleLoader::new();

    let report = match loader.load(&options.id, &rewritten) {
        Ok(handle) => json!({
            "id": handle.id,
            "type": handle.kind.as_str(),
            "entryPoints": handle.entry_points(),
            "frontmatter": Value::Object(handle.frontmatter.clone()),
            "valves": handle.valves.as_ref().map(|s| s.spec()),
            "userValves": handle.user_valves.as_ref().map(|s| s.spec()),
        }),
        Err(LoadError {
            kind,
            detail,
            frontmatter,
        }) => {
            let mut report = Map::new();
            report.insert("id".to_string(), Value::String(options.id));
            report.insert(
                "error".to_string(),
                json!({ "kind": kind.as_str(), "detail": detail }),
            );
            report.insert("frontmatter".to_string(), Value::Object(frontmatter));
            Value::Object(report)
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
