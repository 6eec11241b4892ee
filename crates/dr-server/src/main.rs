use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dr_core::Orchestrator;
use dr_providers::GeminiInteractions;
use dr_report::RedirectResolver;

mod config;
mod server;
mod service;

use config::Settings;
use service::{FollowUpArgs, ResearchService, StartOrPollArgs};

/// Log level for tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Most verbose: raw request and response payloads
    Trace,
    /// Verbose: poll transitions, redirect resolution
    Debug,
    /// Standard: job submission and completion
    Info,
    /// Quiet: only warnings and errors
    Warn,
    /// Minimal: only errors
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "deep-research-mcp")]
#[command(author, version, about = "Gemini Deep Research as an MCP server", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/deep-research/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Enable debug logging (shorthand for --log-level debug)
    #[arg(short, long)]
    pub debug: bool,

    /// Write logs to file (JSON-lines format) instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the research tools over MCP stdio (default)
    Serve,
    /// Start a research job and print the result
    Research {
        prompt: String,
        /// Return right after submission instead of waiting
        #[arg(long)]
        no_wait: bool,
        /// Seconds to wait for completion (default: configured timeout)
        #[arg(long)]
        timeout: Option<f64>,
    },
    /// Check on an existing research job
    Poll {
        job_id: String,
        /// Fetch the current state once instead of waiting
        #[arg(long)]
        no_wait: bool,
        /// Seconds to wait for completion (default: configured timeout)
        #[arg(long)]
        timeout: Option<f64>,
    },
    /// Ask a follow-up question about a finished job
    FollowUp {
        job_id: String,
        question: String,
        /// Model to answer with (overrides config)
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Show effective configuration
    Config,
}

fn init_logging(cli: &Cli) -> Result<()> {
    // --debug overrides --log-level; RUST_LOG overrides both
    let log_level = if cli.debug {
        LogLevel::Debug
    } else {
        cli.log_level
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_filter()));

    // stdout carries the MCP protocol, so logs never go there.
    if let Some(log_path) = &cli.log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("Failed to create log file: {:?}", log_path))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::sync::Mutex::new(file)))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn build_service(settings: &Settings) -> Result<ResearchService> {
    let mut backend = GeminiInteractions::new(settings.api_key());
    if let Some(base_url) = &settings.base_url {
        backend = backend.with_base_url(base_url);
    }
    let orchestrator = Orchestrator::new(Arc::new(backend), settings.orchestrator_config());
    let resolver = RedirectResolver::http().context("Failed to create redirect resolver")?;
    Ok(ResearchService::new(
        orchestrator,
        Arc::new(resolver),
        settings.timeout(),
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn show_config(settings: &Settings, path: &std::path::Path) -> Result<()> {
    let redacted = settings.redacted();
    println!("Configuration:");
    println!("  Config file: {}", path.display());
    println!(
        "  API key: {}",
        redacted.api_key.as_deref().unwrap_or("(not set)")
    );
    println!("  Model: {}", redacted.model);
    println!("  Deep research agent: {}", redacted.deep_research_agent);
    println!("  Poll interval: {}s", redacted.poll_interval_seconds);
    println!("  Timeout: {}s", redacted.timeout_seconds);
    if let Some(base_url) = &redacted.base_url {
        println!("  Base URL: {}", base_url);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Existing environment variables win over .env entries.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli)?;

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Settings::config_path()?,
    };

    if matches!(&cli.command, Some(Commands::Config)) {
        // Shown even when incomplete so a missing key can be diagnosed.
        let settings: Settings = Settings::figment(&config_path)
            .extract()
            .context("Failed to read configuration")?;
        return show_config(&settings, &config_path);
    }

    let settings = Settings::load(Some(config_path.as_path())).context("Invalid configuration")?;
    let service = build_service(&settings)?;

    match cli.command {
        None | Some(Commands::Serve) => server::serve_stdio(Arc::new(service)).await,
        Some(Commands::Research {
            prompt,
            no_wait,
            timeout,
        }) => {
            let output = service
                .start_or_poll(StartOrPollArgs {
                    prompt: Some(prompt),
                    job_id: None,
                    wait: !no_wait,
                    timeout_seconds: timeout,
                })
                .await?;
            print_json(&output)
        }
        Some(Commands::Poll {
            job_id,
            no_wait,
            timeout,
        }) => {
            let output = service
                .start_or_poll(StartOrPollArgs {
                    prompt: None,
                    job_id: Some(job_id),
                    wait: !no_wait,
                    timeout_seconds: timeout,
                })
                .await?;
            print_json(&output)
        }
        Some(Commands::FollowUp {
            job_id,
            question,
            model,
        }) => {
            let output = service
                .follow_up(FollowUpArgs {
                    prior_job_id: job_id,
                    question,
                    model,
                })
                .await?;
            print_json(&output)
        }
        Some(Commands::Config) => Ok(()),
    }
}
