//! Validate configuration command.

use anyhow::{Context, Result};
use std::path::Path;
use workbench_config::load_settings;

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    match config_path {
        Some(path) => println!("Validating configuration: {:?}", path),
        None => println!("Validating configuration from defaults and environment"),
    }

    match load_settings(config_path) {
        Ok(settings) => {
            println!("Configuration is valid!");
            println!();
            let rendered = toml::to_string_pretty(&settings).context("rendering settings")?;
            println!("{}", rendered);
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
