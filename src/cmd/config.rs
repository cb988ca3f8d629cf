//! Configuration view and validation commands: `appforge config`.

use std::path::Path;

use anyhow::{Result, bail};

use super::super::ConfigCommands;
use appforge::config::AppforgeConfig;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = AppforgeConfig::path_in(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = AppforgeConfig::resolve(project_dir)?;
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No config file found, showing defaults");
            }
            println!();
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let config = AppforgeConfig::resolve(project_dir)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                for warning in &warnings {
                    println!("warning: {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                bail!("Config file already exists: {}", config_path.display());
            }
            AppforgeConfig::default().save(&config_path)?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
