//! Database initialization command — `corkboard init`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use corkboard::board::server::open_database;
use corkboard::config::{CliOverrides, CorkboardConfig};

pub fn cmd_init(project_dir: &Path, db_path: Option<PathBuf>) -> Result<()> {
    let overrides = CliOverrides {
        db_path,
        ..CliOverrides::default()
    };
    let config = CorkboardConfig::resolve(project_dir, &overrides)?;

    open_database(&config.database.path)?;
    println!(
        "Board database initialized at {}",
        config.database.path.display()
    );
    Ok(())
}
