//! # dux
//!
//! Demo command-line entry point for the directory-sizing engine. Not part
//! of the engine's spec (the HTTP/SSE transport and UI are explicitly out
//! of scope, per `spec.md` §1) — this binary is a stand-in client that
//! prints the same event sequence a transport would forward, as
//! line-delimited JSON.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dux_config::EngineConfig;
use dux_engine::Engine;
use futures::StreamExt;

#[derive(Parser)]
#[command(name = "dux")]
#[command(version, about = "Concurrent directory-usage analyser engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream recursive sizes for a directory's immediate children.
    Usage {
        /// Directory to scan. Defaults to the configured initial
        /// directory, or the current directory if none is set.
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
    /// Invalidate the cached subtree rooted at PATH.
    Refresh {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dux_config::logging::init_logging(dux_config::logging::LogLevel::Info);

    let cli = Cli::parse();
    let config = EngineConfig::load();
    let engine = Engine::new(config);

    match cli.command {
        Commands::Usage { path } => usage(&engine, path).await,
        Commands::Refresh { path } => refresh(&engine, path),
    }

    Ok(())
}

async fn usage(engine: &Engine, path: Option<PathBuf>) {
    let session = engine.usage(path);
    let stream = session.stream;
    tokio::pin!(stream);

    while let Some(event) = stream.next().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("dux: failed to serialize event: {e}"),
        }
    }
}

fn refresh(engine: &Engine, path: PathBuf) {
    engine.refresh(path);
}
