use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use structgrep::render::{render, ColorFormat, DisplayMode, RenderOptions};
use structgrep::search::{search, EngineSettings, SearchSpec};
use structgrep::{GrepConfig, GrepResult, OperationCatalog};

/// Semantic grep for C structures: finds where a structure's attribute is
/// used, set, tested, dereferenced, passed or freed, using the Coccinelle
/// spatch engine.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Name of the structure type to search for
    #[arg(short = 't', long = "type", required_unless_present_any = ["list_operations", "describe"])]
    type_name: Option<String>,

    /// Name of the structure attribute
    #[arg(short = 'a', long = "attribute", required_unless_present_any = ["list_operations", "describe"])]
    attribute: Option<String>,

    /// Operation to search for
    #[arg(short = 'o', long, default_value = "used")]
    operation: String,

    /// Number of context lines before each match
    #[arg(short = 'B', long, default_value = "0")]
    before_context: usize,

    /// Number of context lines after each match
    #[arg(short = 'A', long, default_value = "0")]
    after_context: usize,

    /// Number of context lines around each match (overrides -A and -B)
    #[arg(short = 'C', long)]
    context: Option<usize>,

    /// Output mode (raw|color|vim|emacs|grep)
    #[arg(short = 'm', long, default_value = "raw")]
    mode: String,

    /// Color output flavor (term|html)
    #[arg(long, default_value = "term")]
    color_format: String,

    /// Name or path of the spatch binary
    #[arg(short = 's', long)]
    spatch: Option<String>,

    /// Search C++ sources
    #[arg(long = "cpp")]
    cpp: bool,

    /// Number of spatch processes to run in parallel
    #[arg(short = 'j', long)]
    ncpus: Option<usize>,

    /// Additional operation template file (can be specified multiple times)
    #[arg(short = 'O', long = "operation-file")]
    operation_files: Vec<PathBuf>,

    /// List the available operations and exit
    #[arg(short = 'l', long)]
    list_operations: bool,

    /// Describe one operation and exit
    #[arg(long, value_name = "OPERATION")]
    describe: Option<String>,

    /// Configuration file to load instead of the standard locations
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep the compiled script and log engine invocations
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Files to search
    files: Vec<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("{}", err.to_string().red());
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> GrepResult<()> {
    let config = GrepConfig::load_from(cli.config.as_deref())?;
    init_tracing(cli, &config);

    let mut catalog = OperationCatalog::new();
    if let Some(dir) = &config.templates_dir {
        catalog.scan_dir(dir)?;
    }
    catalog.register(&cli.operation_files);

    if cli.list_operations {
        for name in catalog.list() {
            match catalog.describe(&name).ok().and_then(|info| {
                info.get("Desc").map(String::from)
            }) {
                Some(desc) => println!("{}: {}", name, desc),
                None => println!("{}", name),
            }
        }
        return Ok(());
    }

    if let Some(name) = &cli.describe {
        println!("{}", catalog.describe(name)?);
        return Ok(());
    }

    let spec = SearchSpec::new(
        cli.type_name.clone().unwrap_or_default(),
        cli.attribute.clone().unwrap_or_default(),
        cli.operation.clone(),
    );
    let settings = EngineSettings {
        spatch_cmd: cli.spatch.clone().unwrap_or_else(|| config.spatch.cmd.clone()),
        options: config.spatch.options.clone(),
        cpp: cli.cpp,
        concurrency: cli.ncpus.unwrap_or_else(|| config.effective_concurrency()),
        verbose: cli.verbose,
    };
    let opts = RenderOptions {
        mode: DisplayMode::from_str(&cli.mode)?,
        before: cli.context.unwrap_or(cli.before_context),
        after: cli.context.unwrap_or(cli.after_context),
        format: ColorFormat::from_str(&cli.color_format)?,
    };

    let output = search(&spec, &cli.files, &settings, &catalog)?;
    let text = render(&output, &opts)?;
    if !text.is_empty() {
        println!("{}", text);
    }
    Ok(())
}

fn init_tracing(cli: &Cli, config: &GrepConfig) {
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
