//! Error types for structgrep.
//!
//! Every failure falls into one of two user-facing kinds, and the caller is
//! expected to react differently to each:
//!
//! - [`GrepError::Config`]: the spatch engine is missing, not executable, or
//!   misreports its version, or an operation template is malformed. Fixing it
//!   means installing or configuring something, not changing the invocation.
//! - [`GrepError::Run`]: the invocation itself is wrong — no type to search,
//!   an unknown operation name, a missing input file, or any other process
//!   launch failure.
//!
//! Both kinds abort the whole run; partial results are never returned.
//! Malformed engine output is not an error at all — unparsable lines are
//! silently dropped by the match parser.

use thiserror::Error;

/// Result type for structgrep operations
pub type GrepResult<T> = Result<T, GrepError>;

/// Errors that can occur while compiling or running a search
#[derive(Error, Debug)]
pub enum GrepError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Run error: {0}")]
    Run(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GrepError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn run(msg: impl Into<String>) -> Self {
        Self::Run(msg.into())
    }

    /// True for errors the caller should fix by installing or configuring
    /// the engine rather than by changing the invocation.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
