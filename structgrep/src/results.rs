//! Search result types.
//!
//! A [`FieldMatch`] is one engine-reported coordinate range identifying a
//! single occurrence of the searched attribute; the column range covers
//! exactly the matched token so rendering can highlight it. Matches are kept
//! as the engine produced them, in the order received: a line holding two
//! independent occurrences yields two records, and nothing collapses them.

use std::path::PathBuf;

/// A single engine-reported match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatch {
    /// File the match was found in
    pub file: PathBuf,
    /// Line of the matched token (1-based)
    pub line: usize,
    /// Column where the matched token starts (0-based)
    pub column: usize,
    /// Line where the matched token ends
    pub line_end: usize,
    /// Column just past the matched token
    pub column_end: usize,
}

/// The complete result of one search
#[derive(Debug, Clone)]
pub struct SearchOutput {
    /// The structure type that was searched
    pub type_name: String,
    /// The attribute that was searched
    pub attribute: String,
    /// The operation that produced these matches
    pub operation: String,
    /// Matches in the order the engine reported them
    pub matches: Vec<FieldMatch>,
}

impl SearchOutput {
    /// Number of matches found
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// True when the engine reported no match at all
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}
