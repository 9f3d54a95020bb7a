//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Report, Result, WrapErr};
use folio_core::dispatcher;
use folio_core::pipeline::{self, ProgressReporter, RunConfig, RunSummary};
use folio_markdown::{Converter, DocumentConverter};
use folio_shared::{
    AppConfig, ConversionJob, ConverterConfig, EngineKind, FolioError, OnError, init_config,
    init_config_at, load_config, load_config_from, validate,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// folio: batch-convert Word documents to Markdown.
#[derive(Parser)]
#[command(
    name = "folio",
    version,
    about = "Convert every .docx file in a folder to Markdown, extracting embedded media.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.folio/folio.toml).
    #[arg(long, global = true, env = "FOLIO_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Converter selection shared by several subcommands.
#[derive(clap::Args, Debug, Default)]
pub(crate) struct ConverterArgs {
    /// Conversion backend: pandoc or builtin.
    #[arg(long)]
    pub engine: Option<EngineKind>,

    /// Program run by the pandoc backend.
    #[arg(long, value_name = "PROGRAM")]
    pub converter: Option<String>,

    /// Per-document timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Convert every .docx file in a folder to Markdown.
    Convert {
        /// Folder containing the .docx files.
        #[arg(short, long)]
        input: PathBuf,

        /// Folder for extracted media (defaults to the input folder).
        #[arg(long)]
        media_dir: Option<PathBuf>,

        /// What to do after a failed document: abort or skip.
        #[arg(long)]
        on_error: Option<OnError>,

        /// Number of documents converted concurrently.
        #[arg(short, long)]
        jobs: Option<usize>,

        #[command(flatten)]
        converter: ConverterArgs,
    },

    /// Convert a single document.
    Render {
        /// The .docx file to convert.
        file: PathBuf,

        /// Write the Markdown here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        converter: ConverterArgs,
    },

    /// Verify the converter is available and print its version.
    Check {
        #[command(flatten)]
        converter: ConverterArgs,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "folio=warn",
        1 => "folio=info",
        2 => "folio=debug",
        _ => "folio=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

/// At least one document failed, or the run was aborted.
const EXIT_JOB_FAILED: u8 = 1;
/// Invalid input folder or configuration.
const EXIT_CONFIG: u8 = 2;
/// The converter program is missing.
const EXIT_DEPENDENCY: u8 = 3;

/// Map an error that ended the command to the process exit code.
pub(crate) fn exit_code(report: &Report) -> ExitCode {
    match report.downcast_ref::<FolioError>() {
        Some(FolioError::Config { .. }) => ExitCode::from(EXIT_CONFIG),
        Some(FolioError::DependencyMissing { .. }) => ExitCode::from(EXIT_DEPENDENCY),
        _ => ExitCode::from(EXIT_JOB_FAILED),
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config;
    match cli.command {
        Command::Convert {
            input,
            media_dir,
            on_error,
            jobs,
            converter,
        } => cmd_convert(config_path.as_deref(), input, media_dir, on_error, jobs, &converter).await,
        Command::Render {
            file,
            output,
            converter,
        } => cmd_render(config_path.as_deref(), &file, output.as_deref(), &converter).await,
        Command::Check { converter } => cmd_check(config_path.as_deref(), &converter).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path.as_deref()),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

/// Load the config file, or defaults when the default file does not exist.
fn load_app_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let config = match explicit {
        Some(path) if !path.exists() => {
            return Err(FolioError::config(format!(
                "config file '{}' does not exist",
                path.display()
            ))
            .into());
        }
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Apply converter flags over the loaded config.
fn apply_converter_args(config: &mut AppConfig, args: &ConverterArgs) {
    if let Some(engine) = args.engine {
        config.converter.engine = engine;
    }
    if let Some(program) = &args.converter {
        config.converter.program = program.clone();
    }
    if let Some(timeout) = args.timeout {
        config.converter.timeout_secs = timeout;
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_convert(
    config_path: Option<&Path>,
    input: PathBuf,
    media_dir: Option<PathBuf>,
    on_error: Option<OnError>,
    jobs: Option<usize>,
    converter_args: &ConverterArgs,
) -> Result<ExitCode> {
    let mut config = load_app_config(config_path)?;
    apply_converter_args(&mut config, converter_args);
    if let Some(policy) = on_error {
        config.run.on_error = policy;
    }
    if let Some(jobs) = jobs {
        config.run.jobs = jobs;
    }
    validate(&config)?;

    let mut run_config = RunConfig::from_app_config(input, &config);
    if media_dir.is_some() {
        run_config.media_dir = media_dir;
    }

    let converter = Arc::new(Converter::from_config(&ConverterConfig::from(&config)));
    info!(engine = %config.converter.engine, input = %run_config.input_folder.display(), "convert");

    let progress = CliProgress::new();
    let result = pipeline::run(&run_config, converter, &progress).await;
    progress.clear();
    let summary = result?;

    if summary.aborted {
        eprintln!(
            "Aborted after a failure; {} file(s) not attempted.",
            summary.not_attempted
        );
    }

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_JOB_FAILED)
    })
}

async fn cmd_render(
    config_path: Option<&Path>,
    file: &Path,
    output: Option<&Path>,
    converter_args: &ConverterArgs,
) -> Result<ExitCode> {
    let mut config = load_app_config(config_path)?;
    apply_converter_args(&mut config, converter_args);
    validate(&config)?;

    if !file.is_file() {
        return Err(FolioError::config(format!("'{}' is not a file", file.display())).into());
    }

    let converter_config = ConverterConfig::from(&config);
    let converter = Converter::from_config(&converter_config);
    converter.ensure_available()?;

    let media_target = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let link_base = match output {
        Some(out) => out
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new(".")),
        None => Path::new("."),
    };

    let markdown = dispatcher::render_document(
        &converter,
        file,
        media_target,
        link_base,
        converter_config.timeout,
    )
    .await?;

    match output {
        Some(out) => {
            dispatcher::write_atomically(out, markdown.as_bytes())?;
            println!("Converted `{}` to Markdown.", file.display());
        }
        None => print!("{markdown}"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_check(config_path: Option<&Path>, converter_args: &ConverterArgs) -> Result<ExitCode> {
    let mut config = load_app_config(config_path)?;
    apply_converter_args(&mut config, converter_args);

    let converter = Converter::from_config(&ConverterConfig::from(&config));
    converter.ensure_available()?;
    let version = converter
        .describe()
        .await
        .wrap_err("converter is installed but could not report its version")?;

    println!("{version}");
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<ExitCode> {
    let path = match config_path {
        Some(path) => {
            init_config_at(path)?;
            path.to_path_buf()
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_app_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter: spinner on stderr, status lines on stdout/stderr.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn clear(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn run_started(&self, folder: &Path, converter: &str) {
        self.spinner
            .set_message(format!("Converting {} with {converter}", folder.display()));
    }

    fn no_sources(&self, folder: &Path) {
        self.spinner
            .suspend(|| eprintln!("No .docx files found in `{}`.", folder.display()));
    }

    fn job_converted(&self, job: &ConversionJob) {
        self.spinner
            .suspend(|| println!("Converted `{}` to Markdown.", job.source_path.display()));
    }

    fn job_failed(&self, source: &Path, error: &FolioError) {
        self.spinner
            .suspend(|| eprintln!("Failed to convert `{}`: {error}", source.display()));
    }

    fn done(&self, summary: &RunSummary) {
        self.spinner.finish_and_clear();
        info!(
            converted = summary.converted,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "done"
        );
    }
}
