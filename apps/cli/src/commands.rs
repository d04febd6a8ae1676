//! CLI command definitions, routing, and tracing setup.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use versebatch_core::input::read_lines;
use versebatch_core::{
    ChatSession, Embedder, ExampleSet, MapReduceSettings, Model, NearestExamples, OutputWriter,
    Pricing, ProgressReporter, PromptContext, PromptSettings, SharedProgress, Template, Wordlist,
};
use versebatch_crawler::HttpFetcher;
use versebatch_shared::{AppConfig, RunReport, init_config, load_config, validate_api_key};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// versebatch: run prompts and downloads concurrently over batches of text.
#[derive(Parser)]
#[command(
    name = "versebatch",
    version,
    about = "Run language-model prompts and document downloads over batches of text.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Number of concurrent workers (defaults to config).
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    /// Output file (defaults to config).
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Log file (defaults to the output file plus `.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Model name; `math` selects the offline arithmetic model.
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Nucleus sampling parameter.
    #[arg(long, global = true)]
    pub top_p: Option<f32>,

    /// Number of completions requested per call.
    #[arg(long = "gpt-n", global = true)]
    pub n: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Example translations for `{NEAREST_EXAMPLE_IN}` and `{NEAREST_EXAMPLE_OUT}`.
#[derive(Args, Debug, Default)]
pub(crate) struct ExampleArgs {
    /// Example inputs, one per line.
    #[arg(long)]
    pub examples_in: Option<PathBuf>,

    /// Example outputs, line-aligned with `--examples-in`.
    #[arg(long)]
    pub examples_out: Option<PathBuf>,

    /// Embeddings of the example inputs, from `compute-embeddings`.
    #[arg(long)]
    pub examples_embeddings: Option<PathBuf>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the prompt once per line of the input file; results keep line order.
    PromptAll {
        /// Input text file.
        #[arg(short, long)]
        input: PathBuf,

        /// Line selection, e.g. `1,3-4,6` (1-based).
        #[arg(short = 'L', long)]
        lines: Option<String>,

        /// Prompt template file.
        #[arg(short, long)]
        prompt: PathBuf,

        /// Wordlist of preferred translations (JSON lines).
        #[arg(long)]
        wordlist: Option<PathBuf>,

        #[command(flatten)]
        examples: ExampleArgs,
    },

    /// Run the prompt once per `*.txt` file in a folder.
    PromptFolder {
        /// Folder of `*.txt` files.
        #[arg(short, long)]
        input: PathBuf,

        /// Prompt template file.
        #[arg(short, long)]
        prompt: PathBuf,

        /// Wordlist of preferred translations (JSON lines).
        #[arg(long)]
        wordlist: Option<PathBuf>,

        #[command(flatten)]
        examples: ExampleArgs,
    },

    /// Map a prompt over every line of each file, then reduce each file.
    MapReduce {
        /// Folder of `*.txt` files.
        #[arg(short, long)]
        input: PathBuf,

        /// Map prompt template file, applied per line.
        #[arg(short, long)]
        prompt: PathBuf,

        /// Reduce prompt template file, applied per file.
        #[arg(short, long)]
        reduce: PathBuf,

        /// Wordlist of preferred translations (JSON lines).
        #[arg(long)]
        wordlist: Option<PathBuf>,

        #[command(flatten)]
        examples: ExampleArgs,
    },

    /// Download, save and validate the documents listed in a CSV.
    DownloadCsv {
        /// CSV with `ID`, `Url`, `First line` and `Word count` columns.
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for downloaded documents.
        #[arg(long, default_value = "downloads")]
        output_dir: PathBuf,
    },

    /// Download and save a single document.
    DownloadUrl {
        /// Document URL.
        #[arg(short, long)]
        url: String,

        /// Directory for the downloaded document.
        #[arg(long, default_value = "downloads")]
        output_dir: PathBuf,

        /// File name without extension (defaults to the URL's last segment).
        #[arg(short, long)]
        file_id: Option<String>,
    },

    /// Send the whole input file as a single query.
    Prompt {
        /// Input text file.
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Chat interactively. Finish a message with `end` or `go`; leave with
    /// `exit` or `quit`.
    Chat {
        /// System prompt.
        #[arg(short, long, default_value = "You are a helpful assistant.")]
        prompt: String,
    },

    /// Count the tokens in the input file and estimate the prompting cost.
    #[command(alias = "counttokens")]
    CountTokens {
        /// Input text file.
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Write the embedding of each input line as a JSON array.
    ComputeEmbeddings {
        /// Input text file.
        #[arg(short, long)]
        input: PathBuf,

        /// Line selection, e.g. `1,3-4,6` (1-based).
        #[arg(short = 'L', long)]
        lines: Option<String>,
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

/// Load the config file and apply CLI overrides.
pub(crate) fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = load_config()?;

    if let Some(workers) = cli.workers {
        config.defaults.workers = workers;
    }
    if let Some(output) = &cli.output {
        config.defaults.output = output.to_string_lossy().into_owned();
    }
    if let Some(model) = &cli.model {
        config.model.model = model.clone();
    }
    if let Some(top_p) = cli.top_p {
        config.model.top_p = top_p;
    }
    if let Some(n) = cli.n {
        config.model.n = n;
    }

    Ok(config)
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing: console output per `--log-format`, plus a plain-text
/// log file next to the output file.
pub(crate) fn init_tracing(cli: &Cli, config: &AppConfig) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, Layer, fmt};

    let filter = match cli.verbose {
        0 => "versebatch=info",
        1 => "versebatch=debug",
        _ => "versebatch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let log_path = cli
        .log_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.log", config.defaults.output)));
    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("cannot create log directory {}", parent.display()))?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .wrap_err_with(|| format!("cannot open log file {}", log_path.display()))?;

    let console = match cli.log_format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    };
    let file = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();

    Ok(())
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Command::PromptAll {
            input,
            lines,
            prompt,
            wordlist,
            examples,
        } => {
            let context = prompt_context(&config, wordlist.as_deref(), &examples)?;
            cmd_prompt_all(&config, &input, lines.as_deref(), &prompt, context).await
        }
        Command::PromptFolder {
            input,
            prompt,
            wordlist,
            examples,
        } => {
            let context = prompt_context(&config, wordlist.as_deref(), &examples)?;
            cmd_prompt_folder(&config, &input, &prompt, context).await
        }
        Command::MapReduce {
            input,
            prompt,
            reduce,
            wordlist,
            examples,
        } => {
            let context = prompt_context(&config, wordlist.as_deref(), &examples)?;
            cmd_map_reduce(&config, &input, &prompt, &reduce, context).await
        }
        Command::DownloadCsv { input, output_dir } => {
            cmd_download_csv(&config, &input, &output_dir).await
        }
        Command::DownloadUrl {
            url,
            output_dir,
            file_id,
        } => cmd_download_url(&config, &url, &output_dir, file_id.as_deref()).await,
        Command::Prompt { input } => cmd_prompt(&config, &input).await,
        Command::Chat { prompt } => cmd_chat(&config, &prompt).await,
        Command::CountTokens { input } => cmd_count_tokens(&config, &input).await,
        Command::ComputeEmbeddings { input, lines } => {
            cmd_compute_embeddings(&config, &input, lines.as_deref()).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

fn build_model(config: &AppConfig) -> Result<Arc<Model>> {
    validate_api_key(&config.model)?;
    let model = Model::from_config(&config.model)?;
    info!(model = %config.model.model, top_p = config.model.top_p, n = config.model.n, "model selected");
    Ok(Arc::new(model))
}

fn open_output(config: &AppConfig) -> Result<Arc<OutputWriter>> {
    let writer = OutputWriter::open(Path::new(&config.defaults.output))?;
    info!(path = %writer.path().display(), "writing results");
    Ok(Arc::new(writer))
}

fn prompt_context(
    config: &AppConfig,
    wordlist: Option<&Path>,
    examples: &ExampleArgs,
) -> Result<PromptContext> {
    let wordlist = wordlist.map(Wordlist::load).transpose()?;
    let context = PromptContext::new(wordlist);

    let examples = ExampleSet::load(
        examples.examples_in.as_deref(),
        examples.examples_out.as_deref(),
        examples.examples_embeddings.as_deref(),
    )?;
    match examples {
        Some(set) => {
            validate_api_key(&config.model)?;
            info!(examples = set.len(), "nearest-example prompting enabled");
            let embedder = Embedder::from_config(&config.model)?;
            Ok(context.with_examples(NearestExamples::new(set, embedder)))
        }
        None => Ok(context),
    }
}

fn log_started(command: &str) {
    info!(
        command,
        started = %chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "run started"
    );
}

fn log_finished(report: &RunReport) {
    let elapsed = report.elapsed();
    info!(
        run_id = %report.run_id,
        pipeline = %report.pipeline,
        started = %report.started_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
        finished = %report.finished_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
        duration_secs = elapsed.num_milliseconds() as f64 / 1000.0,
        items = report.items,
        succeeded = report.succeeded,
        failed = report.failed,
        "run finished"
    );
}

fn log_usage(config: &AppConfig, model: &Model) {
    let usage = model.usage();
    if usage.total > 0 {
        let cost = Pricing::for_model(&config.model.model).map(|p| usage.cost(p));
        info!(
            prompt_tokens = usage.prompt,
            completion_tokens = usage.completion,
            total_tokens = usage.total,
            cost_usd = ?cost,
            "total token usage"
        );
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_prompt_all(
    config: &AppConfig,
    input: &Path,
    lines: Option<&str>,
    prompt: &Path,
    context: PromptContext,
) -> Result<()> {
    log_started("prompt-all");
    let model = build_model(config)?;
    let lines = read_lines(input, lines)?;
    let settings = PromptSettings {
        template: Template::load(prompt)?,
        context,
        workers: config.defaults.workers,
    };
    let sink = open_output(config)?;

    let progress = CliProgress::new();
    let report = versebatch_core::prompt_all(
        Arc::clone(&model),
        lines,
        settings,
        Arc::clone(&sink),
        progress.shared(),
    )
    .await;
    progress.finish();

    let report = report?;
    sink.close()?;
    log_finished(&report);
    log_usage(config, &model);
    Ok(())
}

async fn cmd_prompt_folder(
    config: &AppConfig,
    input: &Path,
    prompt: &Path,
    context: PromptContext,
) -> Result<()> {
    log_started("prompt-folder");
    let model = build_model(config)?;
    let settings = PromptSettings {
        template: Template::load(prompt)?,
        context,
        workers: config.defaults.workers,
    };
    let sink = open_output(config)?;

    let progress = CliProgress::new();
    let report = versebatch_core::prompt_folder(
        Arc::clone(&model),
        input,
        settings,
        Arc::clone(&sink),
        progress.shared(),
    )
    .await;
    progress.finish();

    let report = report?;
    sink.close()?;
    log_finished(&report);
    log_usage(config, &model);
    Ok(())
}

async fn cmd_map_reduce(
    config: &AppConfig,
    input: &Path,
    prompt: &Path,
    reduce: &Path,
    context: PromptContext,
) -> Result<()> {
    log_started("map-reduce");
    let model = build_model(config)?;
    let settings = MapReduceSettings {
        map: Template::load(prompt)?,
        reduce: Template::load(reduce)?,
        context,
        workers: config.defaults.workers,
    };
    let sink = open_output(config)?;

    let progress = CliProgress::new();
    let report = versebatch_core::map_reduce(
        Arc::clone(&model),
        input,
        settings,
        Arc::clone(&sink),
        progress.shared(),
    )
    .await;
    progress.finish();

    let report = report?;
    sink.close()?;
    log_finished(&report);
    log_usage(config, &model);
    Ok(())
}

async fn cmd_download_csv(config: &AppConfig, input: &Path, output_dir: &Path) -> Result<()> {
    log_started("download-csv");
    let source = std::fs::read_to_string(input)
        .wrap_err_with(|| format!("cannot read {}", input.display()))?;
    let rows = versebatch_core::parse_download_csv(&source)?;
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);

    let progress = CliProgress::new();
    let result = versebatch_core::download_csv(
        fetcher,
        rows,
        output_dir,
        config.validation,
        config.defaults.workers,
        progress.shared(),
    )
    .await;
    progress.finish();

    let result = result?;
    log_finished(&result.report);

    println!();
    println!("  Accepted: {}", result.accepted);
    println!("  Rejected: {}", result.rejected);
    println!("  Failed:   {}", result.failed);
    println!("  Saved to: {}", output_dir.display());
    println!();

    Ok(())
}

async fn cmd_download_url(
    config: &AppConfig,
    url: &str,
    output_dir: &Path,
    file_id: Option<&str>,
) -> Result<()> {
    let file_id = match file_id {
        Some(id) => id.to_string(),
        None => url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty() && !segment.contains(':'))
            .ok_or_else(|| eyre!("cannot derive a file name from '{url}'; pass --file-id"))?
            .to_string(),
    };

    let fetcher = HttpFetcher::new(&config.fetch)?;
    let path = versebatch_core::download_url(&fetcher, url, output_dir, &file_id).await?;
    println!("Saved {url} to {}", path.display());
    Ok(())
}

async fn cmd_prompt(config: &AppConfig, input: &Path) -> Result<()> {
    log_started("prompt");
    let model = build_model(config)?;
    let text = std::fs::read_to_string(input)
        .wrap_err_with(|| format!("cannot read {}", input.display()))?;
    let sink = open_output(config)?;

    let report = versebatch_core::prompt_one(model.as_ref(), &text, sink.as_ref()).await?;
    sink.close()?;
    log_finished(&report);
    log_usage(config, &model);
    Ok(())
}

async fn cmd_chat(config: &AppConfig, system_prompt: &str) -> Result<()> {
    log_started("chat");
    let model = build_model(config)?;
    let sink = open_output(config)?;
    let mut session = ChatSession::new(Arc::clone(&model), system_prompt);

    loop {
        let message = tokio::task::block_in_place(|| {
            versebatch_core::read_message(
                &mut std::io::stdin().lock(),
                &mut std::io::stdout(),
                &config.model.model,
            )
        })?;
        let Some(message) = message else { break };

        let spinner = waiting_spinner();
        let reply = tokio::select! {
            reply = session.send(&message) => Some(reply),
            _ = tokio::signal::ctrl_c() => None,
        };
        spinner.finish_and_clear();

        match reply {
            Some(Ok(reply)) => sink.write_line(&reply)?,
            Some(Err(e)) => warn!(error = %e, "chat message failed"),
            None => println!("(cancelled)"),
        }
    }

    sink.close()?;
    log_usage(config, &model);
    Ok(())
}

async fn cmd_count_tokens(config: &AppConfig, input: &Path) -> Result<()> {
    let text = std::fs::read_to_string(input)
        .wrap_err_with(|| format!("cannot read {}", input.display()))?;
    let model = &config.model.model;
    let sink = open_output(config)?;

    let tokens = versebatch_core::count_tokens(model, &text)?;
    sink.write_line(&format!("Number of tokens: {tokens}"))?;
    if let (Some(cost), Some(pricing)) = (
        versebatch_core::estimate_cost(model, tokens),
        Pricing::for_model(model),
    ) {
        sink.write_line(&format!(
            "{model} prompting cost @ ${}/1K tokens = ${cost:.2}",
            pricing.prompt_per_1k
        ))?;
    }
    sink.close()?;
    Ok(())
}

async fn cmd_compute_embeddings(
    config: &AppConfig,
    input: &Path,
    lines: Option<&str>,
) -> Result<()> {
    log_started("compute-embeddings");
    validate_api_key(&config.model)?;
    let embedder = Embedder::from_config(&config.model)?;
    let lines = read_lines(input, lines)?;
    let sink = open_output(config)?;

    let progress = CliProgress::new();
    progress.phase(&format!("Embedding {} lines", lines.len()));
    let report = versebatch_core::compute_embeddings(&embedder, &lines, sink.as_ref()).await;
    progress.finish();

    let report = report?;
    sink.close()?;
    log_finished(&report);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner shown while a pool drains.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { spinner })
    }

    fn shared(self: &Arc<Self>) -> SharedProgress {
        Arc::clone(self) as SharedProgress
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_done(&self, done: usize, total: usize) {
        self.spinner.set_message(format!("Working [{done}/{total}]"));
    }
}

/// Spinner shown while waiting for a chat reply.
fn waiting_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&[".  ", ".. ", "...", "   "]),
    );
    spinner.set_message("waiting (Ctrl-C to cancel)");
    spinner.enable_steady_tick(Duration::from_millis(500));
    spinner
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prompt_all_with_global_flags() {
        let cli = Cli::try_parse_from([
            "versebatch",
            "prompt-all",
            "-i",
            "in.txt",
            "-p",
            "prompt.txt",
            "-L",
            "1,3-4",
            "-w",
            "4",
            "-m",
            "math",
        ])
        .unwrap();

        assert_eq!(cli.workers, Some(4));
        assert_eq!(cli.model.as_deref(), Some("math"));
        match cli.command {
            Command::PromptAll { input, lines, .. } => {
                assert_eq!(input, PathBuf::from("in.txt"));
                assert_eq!(lines.as_deref(), Some("1,3-4"));
            }
            _ => panic!("expected prompt-all"),
        }
    }

    #[test]
    fn map_reduce_requires_reduce_prompt() {
        assert!(
            Cli::try_parse_from(["versebatch", "map-reduce", "-i", "dir", "-p", "map.txt"])
                .is_err()
        );
    }

    #[test]
    fn parses_example_flags_and_new_subcommands() {
        let cli = Cli::try_parse_from([
            "versebatch",
            "prompt-folder",
            "-i",
            "dir",
            "-p",
            "prompt.txt",
            "--examples-in",
            "in.txt",
            "--examples-out",
            "out.txt",
            "--examples-embeddings",
            "emb.txt",
        ])
        .unwrap();
        match cli.command {
            Command::PromptFolder { examples, .. } => {
                assert_eq!(examples.examples_in, Some(PathBuf::from("in.txt")));
                assert_eq!(examples.examples_embeddings, Some(PathBuf::from("emb.txt")));
            }
            _ => panic!("expected prompt-folder"),
        }

        let cli = Cli::try_parse_from(["versebatch", "chat"]).unwrap();
        match cli.command {
            Command::Chat { prompt } => assert_eq!(prompt, "You are a helpful assistant."),
            _ => panic!("expected chat"),
        }

        let cli = Cli::try_parse_from(["versebatch", "counttokens", "-i", "a.txt"]).unwrap();
        assert!(matches!(cli.command, Command::CountTokens { .. }));

        let cli =
            Cli::try_parse_from(["versebatch", "compute-embeddings", "-i", "a.txt", "-L", "2-3"])
                .unwrap();
        assert!(matches!(cli.command, Command::ComputeEmbeddings { .. }));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
