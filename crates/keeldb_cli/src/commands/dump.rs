//! Dump command implementation.

use keeldb_core::{Log, Micros};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

/// Log entry representation for output.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Entry index.
    pub index: u64,
    /// Entry timestamp.
    pub us: Micros,
    /// Decoded entry.
    pub entry: Value,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    from: u64,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let log: Log<Value> = Log::open_read_only(path)?;
    let entries = read_entries(&log, from, limit);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries, log.head());
        }
    }

    Ok(())
}

fn read_entries(log: &Log<Value>, from: u64, limit: Option<usize>) -> Vec<EntryInfo> {
    log.iter_from(from)
        .take(limit.unwrap_or(usize::MAX))
        .map(|(position, entry)| EntryInfo {
            index: position.index,
            us: position.us,
            entry: (*entry).clone(),
        })
        .collect()
}

fn print_text_output(entries: &[EntryInfo], head: Micros) {
    println!("Log Entries");
    println!("===========");
    println!();

    for info in entries {
        println!("#{} @{}us  {}", info.index, info.us, info.entry);
    }

    println!();
    println!("Total: {} entries, head {}us", entries.len(), head);
}
