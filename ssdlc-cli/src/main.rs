use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ssdlc_core::types::{RawScanRequest, ScanKind, DEFAULT_BRANCH, DEFAULT_SCAN_PATH};
use ssdlc_core::{Config, ErrorBody, ErrorKind, ScanError};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(name = "ssdlc")]
#[command(about = "SSDLC security scan orchestration CLI", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the data directory's config.json)
    #[arg(long, global = true, env = "SSDLC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RepoArgs {
    /// Repository URL (http or https)
    #[arg(long)]
    repo: String,

    /// Branch to check out
    #[arg(long, default_value = DEFAULT_BRANCH)]
    branch: String,

    /// Path to scan, relative to the repository root
    #[arg(long, default_value = DEFAULT_SCAN_PATH)]
    path: String,

    /// Commit the scan is attributed to
    #[arg(long)]
    commit_id: Option<String>,

    /// Caller metadata as a JSON object
    #[arg(long)]
    metadata: Option<String>,
}

impl RepoArgs {
    fn into_request(self, kind: ScanKind) -> RawScanRequest {
        RawScanRequest {
            kind: Some(kind),
            url: Some(self.repo),
            branch: Some(self.branch),
            path: Some(self.path),
            commit_id: self.commit_id,
            metadata: self.metadata,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a Dockerfile for misconfigurations
    DockerFileScan(RepoArgs),

    /// Scan infrastructure-as-code definitions
    IacScan(RepoArgs),

    /// Scan a container image
    ConImgScan {
        /// Image reference (e.g., "registry.example/team/app:1.0")
        #[arg(long)]
        image: String,

        /// Scanner to use (e.g., "wiz", "nexus")
        #[arg(long)]
        tool: String,

        /// Caller metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Software composition analysis of a repository's dependencies
    ScaScan(RepoArgs),

    /// Static code analysis
    StaticCodeScan(RepoArgs),

    /// Remove workspaces left behind by interrupted jobs
    Sweep,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let body = match e.downcast_ref::<ScanError>() {
                Some(scan_error) => scan_error.to_body(),
                None => ErrorBody { kind: ErrorKind::Internal, detail: format!("{:#}", e) },
            };
            match serde_json::to_string(&body) {
                Ok(json) => eprintln!("{}", json),
                Err(_) => eprintln!("{}: {}", body.kind, body.detail),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_file(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => Config::load()?,
    };
    let _observability = ssdlc_core::init_observability(&config.observability)?;

    let request = match cli.command {
        Commands::DockerFileScan(args) => args.into_request(ScanKind::DockerFileScan),
        Commands::IacScan(args) => args.into_request(ScanKind::IacScan),
        Commands::ConImgScan { image, tool, metadata } => RawScanRequest {
            kind: Some(ScanKind::ContainerImageScan),
            image: Some(image),
            tool: Some(tool),
            metadata,
            ..Default::default()
        },
        Commands::ScaScan(args) => args.into_request(ScanKind::ScaScan),
        Commands::StaticCodeScan(args) => args.into_request(ScanKind::StaticCodeScan),
        Commands::Sweep => return commands::sweep(&config).await,
    };

    commands::scan(&config, request).await
}
