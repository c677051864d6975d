//! Configuration view and validation commands — `corkboard config`.

use std::path::Path;

use anyhow::Result;

use corkboard::config::{CliOverrides, CorkboardConfig, config_dir, config_path};

use super::super::ConfigCommands;

fn print_config(config: &CorkboardConfig) {
    println!("[server]");
    println!("  host = \"{}\"", config.server.host);
    println!("  port = {}", config.server.port);
    println!("  dev_mode = {}", config.server.dev_mode);
    println!();
    println!("[database]");
    println!("  path = \"{}\"", config.database.path.display());
    println!();
    println!("[reorder]");
    println!("  out_of_range = \"{}\"", config.reorder.out_of_range);
    println!();
    println!("[logging]");
    println!("  filter = \"{}\"", config.logging.filter);
    println!("  json = {}", config.logging.json);
    println!();
}

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let path = config_path(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Corkboard Configuration");
            println!("=======================");
            println!();

            if path.exists() {
                println!("Config file: {}", path.display());
                println!();
                print_config(&CorkboardConfig::load(&path)?);
            } else {
                println!("No corkboard.toml found at {}", path.display());
                println!("Run 'corkboard config init' to create one.");
                println!();
            }

            // Environment overrides applied, no CLI flags.
            println!("Effective values (with env overrides):");
            println!();
            let effective = CorkboardConfig::resolve(project_dir, &CliOverrides::default())?;
            print_config(&effective);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !path.exists() {
                println!("No corkboard.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = CorkboardConfig::load(&path)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if path.exists() {
                println!("corkboard.toml already exists at {}", path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(config_dir(project_dir))?;
            CorkboardConfig::default().save(&path)?;

            println!("Created corkboard.toml at {}", path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, dev_mode");
            println!("  - [reorder] out_of_range = \"clamp\" or \"reject\"");
            println!();
        }
    }

    Ok(())
}
