//! Inspect command implementation.

use keeldb_backend::{Backend, FileBackend};
use keeldb_core::{Log, Micros, Transaction};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Signature line, if the log has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Number of entries.
    pub entries: u64,
    /// Timestamp of the first entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_us: Option<Micros>,
    /// Timestamp of the last entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_us: Option<Micros>,
    /// Entries shaped like a storage transaction.
    pub transactions: usize,
    /// Mutations across all transactions.
    pub mutation_count: usize,
    /// Mutation count per kind (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutations: Option<BTreeMap<String, usize>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_mutations: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No log found at {:?}", path).into());
    }

    let file_size = FileBackend::open_read_only(path)?.size()?;
    let log: Log<Value> = Log::open_read_only(path)?;
    let result = inspect(path, file_size, &log, show_mutations);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects statistics about an opened log.
pub fn inspect(path: &Path, file_size: u64, log: &Log<Value>, show_mutations: bool) -> InspectResult {
    let mut result = InspectResult {
        path: path.display().to_string(),
        file_size,
        signature: log.signature().map(str::to_string),
        entries: log.size(),
        first_us: log.get(0).map(|(position, _)| position.us),
        last_us: log.last_position().map(|position| position.us),
        transactions: 0,
        mutation_count: 0,
        mutations: None,
    };

    let mut kinds: BTreeMap<String, usize> = BTreeMap::new();
    for (_, entry) in log.iter_from(0) {
        let Ok(transaction) = serde_json::from_value::<Transaction<Value>>((*entry).clone()) else {
            continue;
        };
        result.transactions += 1;
        result.mutation_count += transaction.mutations.len();
        for mutation in &transaction.mutations {
            *kinds.entry(mutation_kind(mutation)).or_insert(0) += 1;
        }
    }
    if show_mutations {
        result.mutations = Some(kinds);
    }
    result
}

/// Variant name of an externally tagged mutation.
fn mutation_kind(mutation: &Value) -> String {
    match mutation {
        Value::Object(map) if map.len() == 1 => map.keys().next().cloned().unwrap_or_default(),
        _ => "<untagged>".to_string(),
    }
}

fn print_text_output(result: &InspectResult) {
    println!("KeelDB Log Inspection");
    println!("=====================");
    println!();
    println!("Path: {}", result.path);
    println!("Size: {} bytes", result.file_size);
    if let Some(signature) = &result.signature {
        println!("Signature: {}", signature);
    }
    println!();
    println!("Entries: {}", result.entries);
    if let (Some(first), Some(last)) = (result.first_us, result.last_us) {
        println!("  First: {} us", first);
        println!("  Last: {} us", last);
    }
    println!("Transactions: {}", result.transactions);
    println!("Mutations: {}", result.mutation_count);

    if let Some(kinds) = &result.mutations {
        println!();
        println!("Mutations by kind:");
        for (kind, count) in kinds {
            println!("  {}: {}", kind, count);
        }
    }
}
