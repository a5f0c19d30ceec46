//! Market data workbench server.

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use workbench_config::load_settings;
use workbench_monitor::setup_logging;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig => cli::commands::validate::run(cli.config.as_deref()).await,
        Commands::Serve(args) => {
            let settings = load_settings(cli.config.as_deref())?;

            let level = cli
                .log_level
                .map(|l| l.as_str().to_string())
                .unwrap_or_else(|| settings.logging.level.clone());
            let json = cli.json_logs || settings.logging.is_json();
            let _guard = setup_logging(&level, json, settings.logging.file.as_deref().map(Path::new));

            cli::commands::serve::run(args, settings).await
        }
    }
}
