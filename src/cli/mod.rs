//! CLI definitions.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "workbench")]
#[command(author, version, about = "Market data workbench: bar ingest, STL decomposition and live updates")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WORKBENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level, overrides the configured one
    #[arg(short, long)]
    pub log_level: Option<LogLevel>,

    /// Enable JSON log format
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP and websocket server
    Serve(ServeArgs),
    /// Validate configuration and print the effective settings
    ValidateConfig,
}

#[derive(clap::Args)]
pub struct ServeArgs {
    /// Bind address, overrides `server.host`
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port, overrides `server.port`
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Skip arming the background timers
    #[arg(long)]
    pub no_timers: bool,
}
