//! Cascade CLI
//!
//! Entry point for the `cascade` command-line tool.

use cascade_config::{CascadeFile, Engine, ExplainOutput, SelectArgs, SelectionContext};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(about = "Resolve effective configuration from cascade rules", version)]
struct Cli {
    /// Debug logging to stderr
    #[arg(long, global = true)]
    debug: bool,

    /// Info logging to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the merged configuration for a module (or `null`)
    Select {
        #[command(flatten)]
        query: QueryArgs,

        /// Pretty-print the JSON result
        #[arg(long)]
        pretty: bool,
    },

    /// List the fragments that would be merged, in order
    Explain {
        #[command(flatten)]
        query: QueryArgs,

        /// Output in human-readable format instead of JSON
        #[arg(long)]
        human: bool,
    },

    /// Validate a cascade file
    Check {
        /// Path to cascade file (default: cascade.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Module id or alias to resolve
    module: String,

    /// Resolve the configuration of this annotation on the module
    #[arg(long, short = 'a')]
    annotation: Option<String>,

    /// Include rules attached to ancestor types
    #[arg(long)]
    inherit: bool,

    /// Path to cascade file (default: cascade.toml)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    #[arg(long)]
    application: Option<String>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    theme: Option<String>,

    /// Locale, with fallbacks (comma-separated, e.g. "en-US,en")
    #[arg(long, value_delimiter = ',')]
    locale: Option<Vec<String>>,
}

impl QueryArgs {
    fn context_overrides(&self) -> SelectionContext {
        SelectionContext {
            application: self.application.clone().map(Into::into),
            user: self.user.clone().map(Into::into),
            theme: self.theme.clone().map(Into::into),
            locale: self.locale.clone().map(Into::into),
        }
    }

    fn select_args(&self) -> SelectArgs {
        SelectArgs {
            inherit: self.inherit,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.verbose);

    match cli.command {
        Commands::Select { query, pretty } => run_select(query, pretty).await,
        Commands::Explain { query, human } => run_explain(query, human).await,
        Commands::Check { config } => run_check(config),
    }
}

/// --debug > --verbose > RUST_LOG > default "warn"
fn init_tracing(debug: bool, verbose: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn config_path(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| PathBuf::from("cascade.toml"))
}

/// Exit status when a resolution fails
const EXIT_RESOLUTION: i32 = 1;

/// Exit status when the cascade file cannot be read or turned into an engine
const EXIT_CONFIG: i32 = 2;

/// A cascade file that loaded and built an engine
struct OpenedFile {
    digest: String,
    modules: usize,
    rule_sets: usize,
    rules: usize,
    external: usize,
    engine: Engine,
}

fn open_engine(path: &Path, overrides: SelectionContext) -> Result<OpenedFile, String> {
    let loaded = CascadeFile::load(path).map_err(|e| format!("Error loading cascade file: {}", e))?;

    let modules = loaded.file.modules.len();
    let rule_sets = loaded.file.rule_sets.len();
    let rules = loaded.file.rule_count();
    let external = loaded.file.external.len();

    let engine = loaded
        .file
        .into_engine(overrides)
        .map_err(|e| format!("Error in cascade file {}: {}", loaded.path, e))?;

    Ok(OpenedFile {
        digest: loaded.digest,
        modules,
        rule_sets,
        rules,
        external,
        engine,
    })
}

fn open_or_exit(path: &Path, overrides: SelectionContext) -> OpenedFile {
    match open_engine(path, overrides) {
        Ok(opened) => opened,
        Err(message) => {
            eprintln!("{}", message);
            process::exit(EXIT_CONFIG);
        }
    }
}

fn load_engine(query: &QueryArgs) -> Engine {
    let path = config_path(query.config.clone());
    open_or_exit(&path, query.context_overrides()).engine
}

fn fail(err: cascade_config::CascadeError) -> ! {
    eprintln!("{}", err.to_json());
    process::exit(EXIT_RESOLUTION);
}

async fn run_select(query: QueryArgs, pretty: bool) {
    let engine = load_engine(&query);

    let result = match engine
        .select_async(&query.module, query.annotation.as_deref(), query.select_args())
        .await
    {
        Ok(result) => result,
        Err(e) => fail(e),
    };

    let rendered = if pretty {
        serde_json::to_string_pretty(&result)
    } else {
        serde_json::to_string(&result)
    };
    match rendered {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}

async fn run_explain(query: QueryArgs, human: bool) {
    let engine = load_engine(&query);
    let args = query.select_args();

    let explanation = match engine
        .explain_async(&query.module, query.annotation.as_deref(), args)
        .await
    {
        Ok(explanation) => explanation,
        Err(e) => fail(e),
    };

    let output = match ExplainOutput::build(&query.module, args.inherit, engine.context(), explanation) {
        Ok(output) => output,
        Err(e) => fail(e),
    };

    if human {
        println!("{}", output.to_human());
    } else {
        match output.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    }
}

fn run_check(config: Option<PathBuf>) {
    let path = config_path(config);
    let opened = open_or_exit(&path, SelectionContext::default());

    println!("Cascade file valid: {}", path.display());
    println!();
    println!("  Digest: {}", opened.digest);
    println!("  Modules: {}", opened.modules);
    println!("  Rule sets: {}", opened.rule_sets);
    println!("  Rules: {}", opened.rules);
    println!("  External entries: {}", opened.external);
    println!("  Configured module ids: {}", opened.engine.store().module_ids().join(", "));
}
