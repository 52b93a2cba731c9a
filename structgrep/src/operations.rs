//! Catalog of named search operations.
//!
//! An operation is a `.cocci` semantic-patch template describing what
//! relationship between a structure type and one of its attributes to look
//! for ("used", "set", "tested", ...). The catalog maps operation names to
//! template sources: the built-in templates shipped with the crate, plus any
//! external files registered by the caller. Registering a template under an
//! existing name overwrites it — last registered wins — and never removes
//! anything else.
//!
//! Templates may carry display metadata in leading comment lines of the form
//! `// Keyword: value` for the keywords Name, Author, Desc, Confidence,
//! File, Revision and Arguments.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::{GrepError, GrepResult};

/// Built-in templates, embedded at compile time from `data/`.
const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("used", include_str!("../data/used.cocci")),
    ("set", include_str!("../data/set.cocci")),
    ("test", include_str!("../data/test.cocci")),
    ("deref", include_str!("../data/deref.cocci")),
    ("func", include_str!("../data/func.cocci")),
    ("freed", include_str!("../data/freed.cocci")),
];

/// Metadata keywords recognized in template header comments
const METADATA_KEYWORDS: &[&str] = &[
    "Name",
    "Author",
    "Desc",
    "Confidence",
    "File",
    "Revision",
    "Arguments",
];

static METADATA_COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "^ *// *({}): (.*)",
        METADATA_KEYWORDS.join("|")
    ))
    .expect("metadata comment pattern is valid")
});

/// Filenames acceptable to `register`: non-hidden, ending in `.cocci`
static TEMPLATE_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^.].*\.cocci$").expect("template filename pattern is valid"));

/// Where a template's text comes from
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// Shipped with the crate, embedded at compile time
    Builtin(&'static str),
    /// An external file registered by the caller
    File(PathBuf),
}

/// A named, registered search operation
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub source: TemplateSource,
}

impl Operation {
    /// Reads the template text backing this operation
    pub fn template(&self) -> GrepResult<String> {
        match &self.source {
            TemplateSource::Builtin(text) => Ok((*text).to_string()),
            TemplateSource::File(path) => fs::read_to_string(path).map_err(|e| {
                GrepError::run(format!(
                    "unable to read operation file '{}': {}",
                    path.display(),
                    e
                ))
            }),
        }
    }

    /// Parses the display metadata from the template's header comments
    pub fn info(&self) -> GrepResult<OperationInfo> {
        let text = self.template()?;
        let mut fields = HashMap::new();
        for line in text.lines() {
            if let Some(caps) = METADATA_COMMENT.captures(line) {
                fields.insert(caps[1].to_string(), caps[2].to_string());
            }
        }
        fields
            .entry("Name".to_string())
            .or_insert_with(|| self.name.clone());
        Ok(OperationInfo {
            name: self.name.clone(),
            fields,
        })
    }
}

/// Display metadata attached to an operation
#[derive(Debug, Clone)]
pub struct OperationInfo {
    pub name: String,
    fields: HashMap<String, String>,
}

impl OperationInfo {
    /// Returns the value for a metadata keyword, if the template declared it
    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.fields.get(keyword).map(String::as_str)
    }
}

impl fmt::Display for OperationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name)?;
        match self.get("Desc") {
            Some(desc) => writeln!(f, "{}", desc)?,
            None => return writeln!(f, ": No info available"),
        }
        // Keyword order is fixed so the listing is stable
        for keyword in METADATA_KEYWORDS {
            if matches!(*keyword, "Name" | "Desc" | "File") {
                continue;
            }
            if let Some(value) = self.get(keyword) {
                writeln!(f, " * {}: {}", keyword, value)?;
            }
        }
        Ok(())
    }
}

/// Registry of available operations
#[derive(Debug, Clone)]
pub struct OperationCatalog {
    operations: HashMap<String, Operation>,
}

impl Default for OperationCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationCatalog {
    /// Creates a catalog seeded with the built-in operations
    pub fn new() -> Self {
        let operations = BUILTIN_TEMPLATES
            .iter()
            .map(|(name, text)| {
                (
                    (*name).to_string(),
                    Operation {
                        name: (*name).to_string(),
                        source: TemplateSource::Builtin(text),
                    },
                )
            })
            .collect();
        Self { operations }
    }

    /// Registers every eligible `.cocci` file found in a directory
    pub fn scan_dir(&mut self, dir: &Path) -> GrepResult<()> {
        let entries = fs::read_dir(dir).map_err(|e| {
            GrepError::config(format!(
                "unable to scan template directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
        let paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        self.register(&paths);
        Ok(())
    }

    /// Registers external template files.
    ///
    /// Paths whose filename is hidden or does not end in `.cocci` are
    /// silently ignored. A registration with an existing name overwrites the
    /// previous entry.
    pub fn register<P: AsRef<Path>>(&mut self, paths: &[P]) {
        for path in paths {
            let path = path.as_ref();
            let eligible = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| TEMPLATE_FILENAME.is_match(n));
            if !eligible {
                debug!("Ignoring non-template path: {}", path.display());
                continue;
            }
            let name = operation_name(path);
            debug!("Registering operation '{}' from {}", name, path.display());
            self.operations.insert(
                name.clone(),
                Operation {
                    name,
                    source: TemplateSource::File(path.to_path_buf()),
                },
            );
        }
    }

    /// Names of all registered operations, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.keys().cloned().collect();
        names.sort();
        names
    }

    /// Looks up an operation by name
    pub fn get(&self, name: &str) -> GrepResult<&Operation> {
        self.operations
            .get(name)
            .ok_or_else(|| GrepError::run(format!("unknown operation '{}'", name)))
    }

    /// Reads the template text for a named operation
    pub fn template(&self, name: &str) -> GrepResult<String> {
        self.get(name)?.template()
    }

    /// Returns the display metadata for a named operation
    pub fn describe(&self, name: &str) -> GrepResult<OperationInfo> {
        self.get(name)?.info()
    }
}

/// Operation name for a template path: the filename without `.cocci`
fn operation_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .trim_end_matches(".cocci")
        .to_string()
}
