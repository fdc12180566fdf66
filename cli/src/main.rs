//! Sonar CLI - print language server diagnostics for one file.
//!
//! Logs go to stderr so stdout carries only the report.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use sonar_lsp::{DEFAULT_MAX_CHARS, DiagnosisConfig, DiagnosisReport, Orchestrator, SeverityFilter};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(name = "sonar", version, about = "Print language server diagnostics for a file")]
struct Cli {
    /// Source file to diagnose.
    file: PathBuf,

    /// Only show one severity: all, error, warning, info or hint.
    #[arg(long, default_value = "all")]
    severity: SeverityFilter,

    /// Cut the report after this many characters.
    #[arg(long, default_value_t = DEFAULT_MAX_CHARS)]
    max_chars: usize,

    /// Config file to use instead of ~/.sonar/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// Explicit path first, then the default location. Broken configs fall back
/// to defaults; the loader already logged why.
fn load_config(path: Option<&PathBuf>) -> DiagnosisConfig {
    let loaded = match path {
        Some(path) => DiagnosisConfig::load_from(path).map(Some),
        None => DiagnosisConfig::load(),
    };
    match loaded {
        Ok(Some(config)) => config,
        Ok(None) => DiagnosisConfig::default(),
        Err(e) => {
            tracing::warn!("Using default config: {e}");
            DiagnosisConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config.as_ref());
    let working_dir = std::env::current_dir().context("reading current directory")?;
    let orchestrator = Orchestrator::new(config, working_dir);

    let result = orchestrator
        .get_diagnosis_for_file(&cli.file, cli.severity, cli.max_chars)
        .await;
    orchestrator.shutdown_all().await;

    let report = DiagnosisReport::from(result);
    println!("{}", report.text);

    if report.ok {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
