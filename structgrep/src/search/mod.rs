//! Search orchestration.
//!
//! One search is: validate the request, resolve the operation template,
//! probe the engine version, compile the template into a script, write the
//! script to a temp file shared read-only by every worker, fan the file
//! list out over engine processes, and parse whatever came back.
//!
//! Validation is front-loaded so that a bad request fails before a single
//! process is spawned, and an error from any stage discards the whole run —
//! there are no partial results.

pub mod engine;
pub mod parser;

use std::io::Write;
use std::path::PathBuf;
use tempfile::Builder;
use tracing::{debug, info};

use crate::config::GrepConfig;
use crate::errors::{GrepError, GrepResult};
use crate::operations::OperationCatalog;
use crate::results::SearchOutput;
use crate::template;
use crate::version;

/// What to search for: a structure type, one of its attributes, and the
/// relationship between them
#[derive(Debug, Clone)]
pub struct SearchSpec {
    /// Name of the structure type
    pub type_name: String,
    /// Name of the attribute
    pub attribute: String,
    /// Name of the catalogued operation
    pub operation: String,
}

impl SearchSpec {
    pub fn new(
        type_name: impl Into<String>,
        attribute: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            attribute: attribute.into(),
            operation: operation.into(),
        }
    }
}

/// How to invoke the engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Name or path of the spatch binary
    pub spatch_cmd: String,
    /// Extra options passed to every invocation
    pub options: Vec<String>,
    /// Target the C++ variant of the engine's parser
    pub cpp: bool,
    /// Number of engine processes to run in parallel
    pub concurrency: usize,
    /// Keep the compiled script on disk for inspection
    pub verbose: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            spatch_cmd: "spatch".to_string(),
            options: Vec::new(),
            cpp: false,
            concurrency: 1,
            verbose: false,
        }
    }
}

impl EngineSettings {
    /// Builds engine settings from a loaded configuration
    pub fn from_config(config: &GrepConfig) -> Self {
        Self {
            spatch_cmd: config.spatch.cmd.clone(),
            options: config.spatch.options.clone(),
            cpp: false,
            concurrency: config.effective_concurrency(),
            verbose: false,
        }
    }
}

/// Runs one search over the given files
pub fn search(
    spec: &SearchSpec,
    files: &[PathBuf],
    settings: &EngineSettings,
    catalog: &OperationCatalog,
) -> GrepResult<SearchOutput> {
    info!(
        "Searching '{}' occurrences of {}.{}",
        spec.operation, spec.type_name, spec.attribute
    );

    if spec.type_name.is_empty() {
        return Err(GrepError::run("no structure type to search for"));
    }
    if spec.attribute.is_empty() {
        return Err(GrepError::run("no structure attribute to search for"));
    }
    if files.is_empty() {
        return Err(GrepError::run("no files to search"));
    }
    for file in files {
        if !file.is_file() {
            return Err(GrepError::run(format!(
                "'{}' is not a file, can't continue",
                file.display()
            )));
        }
    }

    let template_text = catalog.template(&spec.operation)?;

    // Resolved once per run, before any worker exists, and threaded into the
    // compiler from here on
    let engine_version = version::detect(&settings.spatch_cmd)?;
    let script = template::compile(
        &template_text,
        &spec.type_name,
        &spec.attribute,
        engine_version.regexp_operator(),
    )?;

    // One script file per run, shared read-only by every worker; it lives
    // until all workers have terminated
    let mut script_file = Builder::new().suffix(".cocci").tempfile()?;
    script_file.write_all(script.as_bytes())?;
    script_file.flush()?;

    // In verbose mode the script is persisted before the run, so it is still
    // there to inspect when the run fails
    let raw = if settings.verbose {
        let kept = script_file
            .into_temp_path()
            .keep()
            .map_err(|e| GrepError::Io(e.error))?;
        debug!("Keeping compiled script at {}", kept.display());
        engine::run(settings, &kept, files)?
    } else {
        engine::run(settings, script_file.path(), files)?
    };

    let matches = parser::parse(&raw);
    info!("Found {} matches", matches.len());

    Ok(SearchOutput {
        type_name: spec.type_name.clone(),
        attribute: spec.attribute.clone(),
        operation: spec.operation.clone(),
        matches,
    })
}
