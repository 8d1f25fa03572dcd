//! CLI surface: `index`, `query`, `status`, and (behind the `serve`
//! feature) `serve` subcommands, following the teacher's `Cli`/`ExitCode`
//! pattern in shape, narrowed to this crate's four operations.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use ainav::config::Settings;
use ainav::daemon::Daemon;
use ainav::error::AinavError;

/// Process exit codes, matching the ambient-stack contract: success,
/// general error, invalid repo, index dimension mismatch.
#[repr(i32)]
#[allow(dead_code)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    InvalidRepo = 2,
    DimensionMismatch = 3,
}

fn exit_code_for(err: &AinavError) -> i32 {
    match err {
        AinavError::InvalidRepo { .. } | AinavError::InvalidQuery { .. } => ExitCode::InvalidRepo as i32,
        AinavError::DimensionMismatch(_) => ExitCode::DimensionMismatch as i32,
        _ => ExitCode::GeneralError as i32,
    }
}

#[derive(Parser)]
#[command(name = "ainav")]
#[command(about = "Natural-language code navigation over a local repository")]
#[command(version)]
pub struct Cli {
    /// Force debug-level logging regardless of RUST_LOG.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Incrementally (re)index a repository.
    Index {
        repo_path: PathBuf,
        /// Force a full re-embed of every file, ignoring stored hashes.
        #[arg(long)]
        rebuild: bool,
    },
    /// Run a natural-language query against an indexed repository.
    Query {
        repo_path: PathBuf,
        query: String,
        #[arg(short = 'n', long, default_value_t = 8)]
        top_k: usize,
    },
    /// Print indexing status for a repository.
    Status { repo_path: PathBuf },
    /// Run the HTTP server (§6 RPC surface).
    #[cfg(feature = "serve")]
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

pub fn run_with(cli: Cli) -> Result<()> {
    let settings = Settings::from_env();
    let daemon = Daemon::new(settings.clone())?;

    let result = match cli.command {
        Commands::Index { repo_path, rebuild } => daemon.index(&repo_path, rebuild).map(|stats| {
            println!("{}", serde_json::to_string_pretty(&stats).expect("serializable"));
        }),
        Commands::Query { repo_path, query, top_k } => daemon.query(&repo_path, &query, top_k).map(|outcome| {
            println!("{}", render_query_outcome(&outcome));
        }),
        Commands::Status { repo_path } => daemon.status(&repo_path).map(|stats| {
            println!("{}", serde_json::to_string_pretty(&stats).expect("serializable"));
        }),
        #[cfg(feature = "serve")]
        Commands::Serve { host, port } => {
            let addr_host = host.unwrap_or(settings.host.clone());
            let addr_port = port.unwrap_or(settings.port);
            let addr = format!("{addr_host}:{addr_port}").parse().map_err(|e| {
                anyhow::anyhow!("invalid host/port {addr_host}:{addr_port}: {e}")
            })?;
            let daemon = std::sync::Arc::new(daemon);
            let runtime = tokio::runtime::Runtime::new()?;
            return runtime.block_on(ainav::api::serve(daemon, addr));
        }
    };

    if let Err(err) = result {
        eprintln!("error[{}] {}", err.code(), err);
        std::process::exit(exit_code_for(&err));
    }
    Ok(())
}

fn render_query_outcome(outcome: &ainav::models::QueryOutcome) -> String {
    let mut lines = Vec::new();
    if let Some(selection) = &outcome.selection {
        lines.push(format!(
            "selection: {}:{} ({}) — {}",
            selection.file,
            selection.line,
            selection.source.as_str(),
            selection.reason
        ));
    } else {
        lines.push("selection: none".to_string());
    }
    lines.push(format!("{} result(s) in {}ms", outcome.matches.len(), outcome.duration_ms));
    for (i, m) in outcome.matches.iter().enumerate() {
        lines.push(format!(
            "{:>2}. {}:{}-{} score={:.3} {}",
            i + 1,
            m.chunk.file_path,
            m.chunk.start_line,
            m.chunk.end_line,
            m.score,
            m.chunk.symbol.as_deref().unwrap_or("-"),
        ));
    }
    lines.join("\n")
}
