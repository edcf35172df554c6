use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use claude_desktop_pkg::fetch::HttpTransport;
use claude_desktop_pkg::pipeline::{run_stage, Pipeline, Stage};
use claude_desktop_pkg::preflight::probe_host;
use claude_desktop_pkg::process::SystemRunner;
use claude_desktop_pkg::PipelineConfig;
use tracing::info;

/// Build a native Claude Desktop package from the Windows installer.
///
/// Must be run through sudo by the user who will own the build outputs.
#[derive(Parser)]
#[command(name = "claude-desktop-pkg", version, about, long_about = None)]
struct Cli {
    /// Download the installer even when a verified copy is cached
    #[arg(short, long)]
    force_download: bool,

    /// TOML file overriding the built-in defaults
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("resolving current directory")?;
    let config = PipelineConfig::load(cli.config.as_deref(), &cwd)?;
    info!("packaging Claude Desktop {}", config.version);

    let host = run_stage(Stage::Preflight, || probe_host(&config))?;
    let runner = SystemRunner::new(host.privileges.clone());
    let transport = HttpTransport::new()?;

    let summary = Pipeline::new(&config, &host, &runner, &transport)
        .force_download(cli.force_download)
        .run()?;

    for warning in summary.warnings() {
        println!("warning: {warning}");
    }
    println!("Package ready: {}", summary.artifact.display());
    Ok(())
}
