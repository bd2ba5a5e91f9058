//! Lexi CLI
//!
//! Runs the assessment server and renders stored results.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use lexi_orchestrator::{
    create_router, AppState, AssessmentStatus, Config, FileStore, OpenAiBackend, ResultStore,
    Services,
};
use lexi_report::{json::JsonGenerator, AssessmentResult, MarkdownGenerator};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the assessment server.
const DEFAULT_PORT: u16 = 8000;

/// How long live sessions get to store their results on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Lexi - Language Proficiency Assessment Server
///
/// Conducts adaptive speaking and reading assessments over WebSocket and
/// stores a CEFR result for each assessment.
#[derive(Parser, Debug)]
#[command(name = "lexi")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: lexi.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Directory holding session snapshots and results
    #[arg(short, long, value_name = "DIR", global = true)]
    store_dir: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the assessment server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Print the stored result of an assessment
    Report {
        /// Assessment to report on
        #[arg(value_name = "ASSESSMENT_ID")]
        assessment_id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Markdown)]
        format: ReportFormat,

        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!(config = ?args.config, "Config file");
    tracing::debug!(store_dir = ?args.store_dir, "Store directory");

    let Args {
        config,
        store_dir,
        command,
        ..
    } = args;

    let result = match command {
        Command::Serve { host, port } => {
            serve(config.as_deref(), store_dir, (host, port).into()).await
        }
        Command::Report {
            assessment_id,
            format,
            output,
        } => {
            report(
                config.as_deref(),
                store_dir,
                &assessment_id,
                format,
                output.as_deref(),
            )
            .await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Runs the server until Ctrl+C.
async fn serve(
    config_path: Option<&str>,
    store_dir: Option<String>,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    tracing::info!("Lexi starting");
    let config = load_config(config_path, store_dir)?;
    print_config(&config);

    let services = build_services(&config);
    let store = Arc::new(FileStore::new(&config.store_dir));
    let state = AppState::new(config, services, store);
    let registry = state.registry.clone();
    let router = create_router(state);

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("Assessment server running on http://{addr}");
    println!("  WebSocket: ws://{addr}/ws/assessment/<assessment_id>");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;

    // upgraded sockets outlive the listener; end them before the runtime does
    let live = registry.len();
    if live > 0 {
        println!("Ending {live} live session(s)...");
    }
    if !registry.shutdown(SHUTDOWN_GRACE).await {
        tracing::warn!(
            remaining = registry.len(),
            "Some sessions did not store a result before exit"
        );
    }

    println!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl+C, shutting down");
    }
}

/// Renders the stored result of one assessment.
async fn report(
    config_path: Option<&str>,
    store_dir: Option<String>,
    assessment_id: &str,
    format: ReportFormat,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let config = load_config(config_path, store_dir)?;
    let store = FileStore::new(&config.store_dir);

    let record = store
        .load_record(assessment_id)
        .await?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No record for assessment '{assessment_id}' in '{}'\n\nSuggestion: Check the id or point --store-dir at the server's store",
                config.store_dir
            )
        })?;

    let result = match record.result {
        Some(result) => result,
        None if record.status == AssessmentStatus::InProgress => anyhow::bail!(
            "Assessment '{assessment_id}' is still in progress\n\nSuggestion: Wait for the session to end or terminate it via the admin API"
        ),
        None => anyhow::bail!(
            "Assessment '{assessment_id}' has no result yet (status: {})",
            record.status
        ),
    };

    match (format, output) {
        (ReportFormat::Json, Some(path)) => {
            JsonGenerator::new(&result)
                .write_to_file(path, true)
                .map_err(|e| {
                    anyhow::anyhow!("Failed to write report: {e}\n\nPath: {}", path.display())
                })?;
            println!("Report written to {}", path.display());
        }
        (_, Some(path)) => {
            std::fs::write(path, render(&result, format)?).map_err(|e| {
                anyhow::anyhow!("Failed to write report: {e}\n\nPath: {}", path.display())
            })?;
            println!("Report written to {}", path.display());
        }
        (_, None) => println!("{}", render(&result, format)?),
    }
    Ok(())
}

fn render(result: &AssessmentResult, format: ReportFormat) -> anyhow::Result<String> {
    Ok(match format {
        ReportFormat::Markdown => MarkdownGenerator::new(result).generate(),
        ReportFormat::Json => JsonGenerator::new(result).generate_pretty()?,
    })
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>, store_dir: Option<String>) -> anyhow::Result<Config> {
    let mut config = match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))?
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}"))?,
    };

    if let Some(store_dir) = store_dir {
        config.store_dir = store_dir;
    }

    // Re-validate after overrides
    config.validate()?;
    Ok(config)
}

/// Wires the speech and language backend, or disabled stand-ins without a key.
fn build_services(config: &Config) -> Services {
    let mut services = Services::disabled(config.service_timeout());

    match std::env::var(&config.llm.api_key_env) {
        Ok(key) if !key.trim().is_empty() => {
            let backend = Arc::new(OpenAiBackend::new(
                reqwest::Client::new(),
                &config.llm,
                key,
            ));
            services.model = backend.clone();
            services.transcriber = backend.clone();
            services.synthesizer = backend;
            tracing::info!(base_url = %config.llm.base_url, "Speech and language backend enabled");
        }
        _ => {
            tracing::warn!(
                env = %config.llm.api_key_env,
                "API key not set, backend calls are disabled"
            );
            println!(
                "Warning: ${} is not set, sessions will run without a backend",
                config.llm.api_key_env
            );
        }
    }

    services
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Default language: {}", config.default_language);
    println!("  Response language: {}", config.response_language);
    println!("  Initial difficulty: {}", config.initial_difficulty);
    println!(
        "  Phases: speaking {}s, reading {}s",
        config.speaking_phase_seconds, config.reading_phase_seconds
    );
    println!("  Store directory: {}", config.store_dir);
    println!("  LLM provider: {:?} ({})", config.llm.provider, config.llm.model);
    if let Some(recipient) = &config.notifications.recipient {
        println!("  Notify: {recipient}");
    }
}
