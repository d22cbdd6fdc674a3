//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use regbrief_core::{Orchestrator, ProgressReporter, RunRequest};
use regbrief_shared::{
    AppConfig, CancelToken, PublishBackend, RegBriefError, RunConfig, RunReport, Stage,
    init_config, load_config, load_config_from,
};

use crate::server;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// NIST SP 800 update briefs for software teams.
#[derive(Parser)]
#[command(
    name = "regbrief",
    version,
    about = "Summarize NIST SP 800 updates for software teams and open a pull request with the brief.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.regbrief/regbrief.toml).
    #[arg(long, global = true, env = "REGBRIEF_CONFIG")]
    pub config: Option<PathBuf>,

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
    /// Run the pipeline once and print the report.
    Run {
        /// Topic to search for (defaults to `defaults.topic`).
        #[arg(short, long)]
        topic: Option<String>,

        /// Maximum number of sources (defaults to `defaults.limit`).
        #[arg(short, long)]
        limit: Option<usize>,

        /// Write artifacts but do not open a pull request.
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        publish: PublishArgs,
    },

    /// Serve the pipeline over HTTP (`GET /healthz`, `POST /run`).
    Serve {
        /// Port to listen on (defaults to `server.port`).
        #[arg(long, env = "PORT")]
        port: Option<u16>,

        #[command(flatten)]
        publish: PublishArgs,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Publish overrides shared by `run` and `serve`.
#[derive(Args, Clone, Default)]
pub(crate) struct PublishArgs {
    /// Target repository as owner/repo.
    #[arg(long, env = "GITHUB_REPO")]
    pub repo: Option<String>,

    /// Base branch for the pull request.
    #[arg(long, env = "GITHUB_BASE")]
    pub base: Option<String>,

    /// GitHub MCP server endpoint.
    #[arg(long, env = "MCP_GITHUB_URL")]
    pub mcp_url: Option<String>,

    /// Publish backend: mcp or github.
    #[arg(long)]
    pub backend: Option<Backend>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum Backend {
    Mcp,
    Github,
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
        0 => "regbrief=info",
        1 => "regbrief=debug",
        _ => "regbrief=trace",
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
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            topic,
            limit,
            dry_run,
            json,
            publish,
        } => {
            let mut config = app_config(cli.config.as_ref())?;
            publish.apply(&mut config);
            cmd_run(&config, topic, limit, dry_run, json).await
        }
        Command::Serve { port, publish } => {
            let mut config = app_config(cli.config.as_ref())?;
            publish.apply(&mut config);
            cmd_serve(&config, port).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(cli.config.as_ref()).await,
        },
    }
}

fn app_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

impl PublishArgs {
    /// Flags win over the config file.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(repo) = &self.repo {
            config.publish.repo = repo.clone();
        }
        if let Some(base) = &self.base {
            config.publish.base = base.clone();
        }
        if let Some(mcp_url) = &self.mcp_url {
            config.publish.mcp_url = mcp_url.clone();
        }
        if let Some(backend) = self.backend {
            config.publish.backend = match backend {
                Backend::Mcp => PublishBackend::Mcp,
                Backend::Github => PublishBackend::Github,
            };
        }
    }
}

/// Resolve secrets from the process environment, once.
fn runtime_config(config: &AppConfig) -> RunConfig {
    RunConfig::resolve(config, |name| std::env::var(name).ok())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: &AppConfig,
    topic: Option<String>,
    limit: Option<usize>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let runtime = runtime_config(config);
    if runtime.search_api_key.is_none() {
        warn!(
            env = %config.search.api_key_env,
            "search key not set, discovery will find nothing"
        );
    }

    let orchestrator = Orchestrator::from_config(&runtime)?;
    let request = RunRequest {
        topic: topic.unwrap_or_else(|| config.defaults.topic.clone()),
        limit: limit.unwrap_or(config.defaults.limit),
        dry_run,
    };

    info!(topic = %request.topic, limit = request.limit, dry_run, "starting regbrief run");

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current stage");
            on_interrupt.cancel();
        }
    });

    let reporter = CliProgress::new()?;
    let report = orchestrator.run(&request, &reporter, &cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    println!("  Run complete!");
    println!("  Run:       {}", report.run_id);
    println!("  Topic:     {}", report.topic);
    println!("  Found:     {}", report.found);
    println!("  Extracted: {}", report.extracted);
    println!("  Kept:      {}", report.kept);
    println!("  Summary:   {}", report.summary_file);
    println!(
        "  PR:        {}",
        report.pr_url.as_deref().unwrap_or("(dry run)")
    );
    for source in &report.meta.sources {
        println!("    [{}] {} <{}>", source.id, source.title, source.url);
    }
    println!();
}

async fn cmd_serve(config: &AppConfig, port: Option<u16>) -> Result<()> {
    let runtime = runtime_config(config);
    let orchestrator = Orchestrator::from_config(&runtime)?;
    let port = port.unwrap_or(config.server.port);

    server::serve(orchestrator, config.defaults.clone(), port)
        .await
        .map_err(|e| eyre!("server error: {e}"))
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&PathBuf>) -> Result<()> {
    let config = app_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Ok(Self { spinner })
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Discovering => "Searching for publications",
        Stage::Extracting => "Extracting documents",
        Stage::Filtering => "Filtering for engineering relevance",
        Stage::Mapping => "Mapping controls",
        Stage::Summarizing => "Writing the brief",
        Stage::Publishing => "Opening pull request",
        Stage::Done => "Done",
        Stage::Failed => "Failed",
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: Stage) {
        self.spinner.set_message(stage_label(stage));
    }

    fn stage_done(&self, stage: Stage, detail: &str) {
        self.spinner
            .println(format!("  ✓ {}: {detail}", stage_label(stage)));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }

    fn failed(&self, _error: &RegBriefError) {
        self.spinner.finish_and_clear();
    }
}
