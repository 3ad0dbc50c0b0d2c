//! chanrpc - move files between two hosts as channeled buffers.
//!
//! One side listens and writes every buffer it receives to disk; the other
//! connects and channels each file it is given.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "chanrpc")]
#[command(about = "Channel files over a size-limited JSON-RPC link")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept one peer and write each received buffer to disk
    Listen {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Directory for received buffers
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Connect to a listener and channel each file
    Send {
        /// Listener address, e.g. 127.0.0.1:4000
        #[arg(short, long)]
        addr: String,

        /// Files to send
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the machine-readable lines.
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match args.command {
        Command::Listen {
            port,
            host,
            out_dir,
        } => commands::listen(&host, port, &out_dir).await,
        Command::Send { addr, files } => commands::send(&addr, &files).await,
    }
}
