//! Log line encoding.
//!
//! ```text
//! {"index":0,"us":101}\t{...entry json...}\n
//! #signature\tschema:v1\n
//! ```
//!
//! Lines starting with `#` are directives. Every other line is an entry: the
//! JSON position, a tab, the JSON entry.

use crate::clock::Micros;
use crate::error::CoreResult;
use crate::types::IndexAndTimestamp;
use serde::Serialize;

/// Directive carrying the log signature.
pub const SIGNATURE_DIRECTIVE: &str = "signature";

/// Directive carrying an idle head update on replication streams.
pub const HEAD_DIRECTIVE: &str = "head";

/// A parsed log line, borrowing from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'a> {
    /// `#<name>\t<value>`.
    Directive {
        /// Directive name, without the leading `#`.
        name: &'a str,
        /// Everything after the tab.
        value: &'a str,
    },
    /// `<position>\t<payload>`.
    Entry {
        /// Index and timestamp of the entry.
        position: IndexAndTimestamp,
        /// Raw entry JSON.
        payload: &'a str,
    },
}

/// Parses one line, with or without its trailing newline.
///
/// # Errors
///
/// Returns a description of the problem when the line is not well formed.
pub fn parse(line: &str) -> Result<Line<'_>, String> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let Some((head, tail)) = line.split_once('\t') else {
        return Err("missing tab separator".to_string());
    };
    if let Some(name) = head.strip_prefix('#') {
        return Ok(Line::Directive { name, value: tail });
    }
    let position: IndexAndTimestamp =
        serde_json::from_str(head).map_err(|e| format!("bad position: {e}"))?;
    if tail.is_empty() {
        return Err("empty entry".to_string());
    }
    Ok(Line::Entry {
        position,
        payload: tail,
    })
}

/// Encodes an entry line, including the trailing newline.
///
/// # Errors
///
/// Returns an error if the entry cannot be serialized.
pub fn encode_entry<E: Serialize>(position: IndexAndTimestamp, entry: &E) -> CoreResult<String> {
    let mut line = serde_json::to_string(&position)?;
    line.push('\t');
    line.push_str(&serde_json::to_string(entry)?);
    line.push('\n');
    Ok(line)
}

/// Encodes a directive line, including the trailing newline.
#[must_use]
pub fn encode_directive(name: &str, value: &str) -> String {
    format!("#{name}\t{value}\n")
}

/// Encodes a head update line.
#[must_use]
pub fn encode_head(us: Micros) -> String {
    encode_directive(HEAD_DIRECTIVE, &us.to_string())
}
