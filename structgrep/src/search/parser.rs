//! Parses the engine's raw output into match records.
//!
//! The engine emits one `file:line:col:line_end:col_end` line per match,
//! interleaved with whatever diagnostics it feels like printing. Any line
//! that is not exactly five colon-separated fields with the four numeric
//! ones parsing as integers is silently dropped; nothing else is rejected.

use std::path::PathBuf;

use crate::results::FieldMatch;

/// Turns raw engine output into match records, preserving input order
pub fn parse(raw: &str) -> Vec<FieldMatch> {
    raw.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<FieldMatch> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != 5 {
        return None;
    }
    Some(FieldMatch {
        file: PathBuf::from(fields[0]),
        line: fields[1].parse().ok()?,
        column: fields[2].parse().ok()?,
        line_end: fields[3].parse().ok()?,
        column_end: fields[4].parse().ok()?,
    })
}
