use std::fs;
use std::io::Read;

use clap::Parser;
use serde_json::Value;

use sifter::{PropertyMapping, QueryEngine, QueryModel, QueryOptions, ValueKind};

/// Apply a filter/sort/pagination query to a JSON array of records.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON array of objects, or `-` for stdin
    json: String,

    /// Filter string, e.g. "Price>100,(Brand==Dell || Brand==HP)"
    #[arg(long)]
    filters: Option<String>,

    /// Sort string, e.g. "-Price,Brand"
    #[arg(long)]
    sorts: Option<String>,

    /// 1-based page number
    #[arg(long)]
    page: Option<usize>,

    /// Page size; 0 disables pagination
    #[arg(long)]
    page_size: Option<usize>,

    /// Field declarations as Name:kind[:path], comma separated
    /// (kinds: str, int, float, bool, datetime). Without this flag the
    /// top-level keys of the first record are registered by inferred kind.
    #[arg(long)]
    fields: Option<String>,

    /// Match property names case-sensitively
    #[arg(long)]
    case_sensitive: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let raw = match read_input(&args.json) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("cannot read {}: {e}", args.json);
            std::process::exit(1);
        }
    };

    let records: Vec<Value> = match serde_json::from_str(&raw) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            eprintln!("input must be a JSON array of objects");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("invalid JSON: {e}");
            std::process::exit(1);
        }
    };

    let mappings = match &args.fields {
        Some(spec) => match parse_fields(spec) {
            Ok(m) => m,
            Err(e) => {
                eprintln!("invalid --fields: {e}");
                std::process::exit(1);
            }
        },
        None => infer_fields(records.first()),
    };

    let options = QueryOptions {
        case_sensitive: args.case_sensitive,
        ..QueryOptions::default()
    };
    let engine = QueryEngine::builder()
        .options(options)
        .configure(|map| {
            for mapping in mappings {
                map.insert(mapping).can_filter().can_sort();
            }
        })
        .build();

    let model = QueryModel {
        filters: args.filters,
        sorts: args.sorts,
        page: args.page,
        page_size: args.page_size,
    };

    match engine.apply(&model, records) {
        Ok(hits) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&Value::Array(hits)).expect("array serializes")
            );
        }
        Err(e) => {
            eprintln!("query failed: {e}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let default = match verbose {
        0 => "warn",
        1 => "sifter=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_target(false)
        .init();
}

fn read_input(path: &str) -> std::io::Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        fs::read_to_string(path)
    }
}

/// `Name:kind[:path],...` → mappings. The path defaults to the name.
fn parse_fields(spec: &str) -> Result<Vec<PropertyMapping<Value>>, String> {
    let mut out = Vec::new();
    for decl in spec.split(',').filter(|d| !d.trim().is_empty()) {
        let mut parts = decl.trim().splitn(3, ':');
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err(format!("missing field name in `{decl}`"));
        }
        let kind: ValueKind = parts
            .next()
            .ok_or_else(|| format!("missing kind in `{decl}`"))?
            .parse()?;
        let path = parts.next().unwrap_or(name);
        out.push(PropertyMapping::json(name, path, kind));
    }
    Ok(out)
}

/// Register every top-level key of the first record with a kind inferred
/// from its value. Nested objects are skipped; declare those with
/// --fields and an explicit path.
fn infer_fields(first: Option<&Value>) -> Vec<PropertyMapping<Value>> {
    let Some(Value::Object(map)) = first else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, value)| {
            let kind = match value {
                Value::Bool(_) => ValueKind::Bool,
                Value::Number(n) if n.is_i64() || n.is_u64() => ValueKind::Int,
                Value::Number(_) => ValueKind::Float,
                Value::String(_) => ValueKind::Str,
                _ => return None,
            };
            Some(PropertyMapping::json(key, key, kind))
        })
        .collect()
}
