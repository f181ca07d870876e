//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use paperscout_abstracts::SemanticScholarProvider;
use paperscout_core::{PipelineStage, ProgressReporter, RunSummary};
use paperscout_scoring::ChatCompletionsClient;
use paperscout_search::DblpProvider;
use paperscout_shared::{init_config, load_config, load_run_file};

/// Per-call timeout for bibliographic search requests, in seconds.
const SEARCH_TIMEOUT_SECS: u64 = 30;

/// Per-call timeout for abstract fetches, in seconds.
const ABSTRACT_TIMEOUT_SECS: u64 = 10;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PaperScout — curate academic papers with AI relevance review.
#[derive(Parser)]
#[command(
    name = "paperscout",
    version,
    about = "Aggregate literature search results, index abstracts, and score relevance with an LLM.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Execute a pipeline run described by a run file.
    Run {
        /// Path to the run file (TOML).
        run_file: PathBuf,

        /// Ignore existing intermediate results and start fresh.
        #[arg(long)]
        no_resume: bool,

        /// Override the output directory from the run file.
        #[arg(short, long)]
        out: Option<String>,

        /// Override the earliest publication year to keep.
        #[arg(long)]
        start_year: Option<i32>,
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

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug,hyper=info,reqwest=info",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            run_file,
            no_resume,
            out,
            start_year,
        } => run_command(run_file, no_resume, out, start_year).await,
        Command::Config { action } => config_command(action),
    }
}

async fn run_command(
    run_file: PathBuf,
    no_resume: bool,
    out: Option<String>,
    start_year: Option<i32>,
) -> Result<()> {
    let app = load_config()?;
    let (mut run_cfg, ai_cfg) = load_run_file(&run_file, &app)?;

    if no_resume {
        run_cfg.resume = false;
    }
    if let Some(out) = out {
        run_cfg.output_dir = PathBuf::from(out);
    }
    if let Some(year) = start_year {
        run_cfg.start_year = year;
    }

    info!(
        run = %run_cfg.run_name,
        targets = run_cfg.targets.len(),
        keywords = run_cfg.keywords.len(),
        resume = run_cfg.resume,
        "loaded run file"
    );

    // Fail fast on a missing API key before any stage runs.
    let completion = Arc::new(ChatCompletionsClient::new(&ai_cfg)?);

    let dblp = DblpProvider::new(
        Url::parse(DblpProvider::DEFAULT_BASE_URL).expect("valid constant URL"),
        run_cfg.search_limit,
        SEARCH_TIMEOUT_SECS,
    )?;
    let semantic_scholar = SemanticScholarProvider::new(
        Url::parse(SemanticScholarProvider::DEFAULT_BASE_URL).expect("valid constant URL"),
        ABSTRACT_TIMEOUT_SECS,
    )?;

    let progress = SpinnerProgress::new();
    let summary = paperscout_core::run_pipeline(
        &run_cfg,
        &ai_cfg,
        &dblp,
        &semantic_scholar,
        completion,
        &progress,
    )
    .await?;

    print_summary(&summary);
    Ok(())
}

fn config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init => {
            let path = init_config()?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let config = load_config()?;
            let rendered = toml::to_string_pretty(&config)?;
            println!("{rendered}");
        }
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run complete in {:.1}s", summary.elapsed.as_secs_f64());
    println!(
        "  {} records, {} scored, {} already checkpointed",
        summary.records_total, summary.scored, summary.already_scored
    );
    println!(
        "  abstracts: {} fetched, {} cached, {} not found",
        summary.abstracts_fetched, summary.abstracts_cached, summary.abstracts_not_found
    );

    if !summary.abstract_errors.is_empty() {
        println!("  abstract fetch failures:");
        for (row_id, error) in &summary.abstract_errors {
            println!("    {row_id}: {error}");
        }
    }
    if !summary.failed.is_empty() {
        let ids: Vec<&str> = summary.failed.iter().map(|r| r.as_str()).collect();
        println!("  scoring failed for: {}", ids.join(", "));
    }

    println!();
    println!("Artifacts:");
    println!("  search table:   {}", summary.search_table.display());
    println!("  indexed table:  {}", summary.indexed_table.display());
    println!("  analysis table: {}", summary.analysis_table.display());
    println!("  abstracts:      {}", summary.abstract_dir.display());
    println!("  checkpoint:     {}", summary.checkpoint_path.display());
}

// ---------------------------------------------------------------------------
// Progress display
// ---------------------------------------------------------------------------

/// Spinner-based progress reporter for interactive runs.
struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {prefix:.bold} {msg}")
                .expect("valid template"),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { bar }
    }
}

impl ProgressReporter for SpinnerProgress {
    fn stage(&self, stage: PipelineStage) {
        self.bar.set_prefix(format!("[{stage}]"));
        self.bar.set_message("");
    }

    fn note(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn done(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}
