//! Layered configuration for structgrep.
//!
//! # Configuration Locations
//!
//! Settings are read from several sources; each later source overrides the
//! earlier ones key-by-key:
//!
//! 1. The package defaults compiled into the library (`data/default.yaml`)
//! 2. The system-wide file `/etc/structgrep.yaml`
//! 3. The per-user file `$CONFIG_DIR/structgrep/config.yaml`
//! 4. A local `.structgrep.yaml` in the current directory
//! 5. An explicit file passed via `--config`
//!
//! Only the package defaults are required, and they cannot be absent: they
//! are embedded in the binary. All other files are optional.
//!
//! # Configuration Format
//!
//! ```yaml
//! spatch:
//!   # Name or path of the Coccinelle spatch binary
//!   cmd: spatch
//!   # Extra options passed to every spatch invocation
//!   options: ["-timeout", "60"]
//!
//! # Number of spatch processes to run in parallel (0 = one per CPU)
//! concurrency: 4
//!
//! # Log level (trace, debug, info, warn, error)
//! log_level: info
//!
//! # Optional extra directory of .cocci operation templates
//! templates_dir: ~/.config/structgrep/templates
//! ```

use config::{Config as ConfigBuilder, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{GrepError, GrepResult};

/// Package defaults, always present as the bottom configuration layer.
const DEFAULT_CONFIG: &str = include_str!("../data/default.yaml");

/// Settings for invoking the spatch engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatchConfig {
    /// Name or path of the spatch binary
    #[serde(default = "default_spatch_cmd")]
    pub cmd: String,

    /// Extra options passed to every spatch invocation
    #[serde(default)]
    pub options: Vec<String>,
}

impl Default for SpatchConfig {
    fn default() -> Self {
        Self {
            cmd: default_spatch_cmd(),
            options: Vec::new(),
        }
    }
}

/// Configuration for a structgrep run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrepConfig {
    /// spatch engine settings
    #[serde(default)]
    pub spatch: SpatchConfig,

    /// Number of spatch processes to run in parallel (0 = one per CPU)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional extra directory of .cocci operation templates
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
}

fn default_spatch_cmd() -> String {
    "spatch".to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for GrepConfig {
    fn default() -> Self {
        // Only the embedded layer: `Default` must not touch the filesystem.
        // The embedded defaults always deserialize; a broken default.yaml is
        // a packaging bug caught by the unit tests below.
        Self::load_layered(std::iter::empty()).unwrap_or(Self {
            spatch: SpatchConfig::default(),
            concurrency: default_concurrency(),
            log_level: default_log_level(),
            templates_dir: None,
        })
    }
}

impl GrepConfig {
    /// Loads configuration from the default layered locations
    pub fn load() -> GrepResult<Self> {
        Self::load_from(None)
    }

    /// Loads configuration, stacking an explicit file on top of the layers
    pub fn load_from(config_path: Option<&Path>) -> GrepResult<Self> {
        let config_files = [
            // System-wide config
            Some(PathBuf::from("/etc/structgrep.yaml")),
            // Per-user config
            dirs::config_dir().map(|p| p.join("structgrep/config.yaml")),
            // Local config
            Some(PathBuf::from(".structgrep.yaml")),
            // Explicit config
            config_path.map(PathBuf::from),
        ];

        Self::load_layered(config_files.iter().flatten())
    }

    /// Builds the configuration from the package defaults plus the given
    /// file paths, in increasing precedence. Missing files are skipped.
    fn load_layered<'a>(paths: impl Iterator<Item = &'a PathBuf>) -> GrepResult<Self> {
        let mut builder =
            ConfigBuilder::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Yaml));

        for path in paths {
            if path.is_file() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GrepError::config(e.to_string()))
    }

    /// Resolved concurrency level: `0` means one worker per CPU
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            num_cpus::get()
        } else {
            self.concurrency
        }
    }
}
