//! Verify command implementation.

use keeldb_backend::{Backend, FileBackend};
use keeldb_core::log::line::{self, Line};
use keeldb_core::Micros;
use serde_json::Value;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of lines checked.
    pub lines_checked: usize,
    /// Number of valid entry lines.
    pub valid_entries: usize,
    /// Signature found on the first line.
    pub signature: Option<String>,
    /// List of errors found, each prefixed with its line number.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, signature: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying log at {:?}", path);
    println!();

    let backend = FileBackend::open_read_only(path)?;
    let data = backend.read_all()?;
    let result = verify(&data, signature);
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every line, continuing past errors.
///
/// Index density and timestamp order are checked against the last valid
/// entry, so one bad line is reported once rather than cascading.
pub fn verify(data: &[u8], expected_signature: Option<&str>) -> VerifyResult {
    let mut result = VerifyResult::default();
    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        Err(e) => {
            result.errors.push(format!("file is not valid UTF-8: {}", e));
            return result;
        }
    };

    let mut next_index = 0u64;
    let mut head: Micros = 0;
    for (i, raw) in text.split_inclusive('\n').enumerate() {
        let line_no = i + 1;
        result.lines_checked += 1;
        if !raw.ends_with('\n') {
            result.errors.push(format!("line {}: unterminated line", line_no));
            continue;
        }

        match line::parse(raw) {
            Err(message) => result.errors.push(format!("line {}: {}", line_no, message)),
            Ok(Line::Directive { name, value }) if name == line::SIGNATURE_DIRECTIVE && line_no == 1 => {
                result.signature = Some(value.to_string());
            }
            Ok(Line::Directive { name, .. }) => {
                result
                    .errors
                    .push(format!("line {}: unexpected directive #{}", line_no, name));
            }
            Ok(Line::Entry { position, payload }) => {
                let mut valid = true;
                if position.index != next_index {
                    result.errors.push(format!(
                        "line {}: expected index {}, found {}",
                        line_no, next_index, position.index
                    ));
                    valid = false;
                }
                if position.us < head {
                    result.errors.push(format!(
                        "line {}: timestamp {} precedes {}",
                        line_no, position.us, head
                    ));
                    valid = false;
                }
                if let Err(e) = serde_json::from_str::<Value>(payload) {
                    result
                        .errors
                        .push(format!("line {}: invalid entry JSON: {}", line_no, e));
                    valid = false;
                }
                if valid {
                    result.valid_entries += 1;
                    next_index += 1;
                    head = position.us;
                }
            }
        }
    }

    if let Some(expected) = expected_signature {
        match &result.signature {
            Some(found) if found == expected => {}
            found => result.errors.push(format!(
                "signature mismatch: expected {:?}, found {:?}",
                expected, found
            )),
        }
    }
    result
}

fn print_result(result: &VerifyResult) {
    if let Some(signature) = &result.signature {
        println!("  Signature: {}", signature);
    }
    println!("  Lines checked: {}", result.lines_checked);
    println!("  Valid entries: {}", result.valid_entries);
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }
}
