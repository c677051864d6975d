//! Board server command — `corkboard serve`.

use std::path::Path;

use anyhow::Result;
use tracing::warn;

use corkboard::board::server::{ServerConfig, start_server};
use corkboard::config::{CliOverrides, CorkboardConfig};

pub async fn cmd_serve(project_dir: &Path, overrides: &CliOverrides) -> Result<()> {
    let config = CorkboardConfig::resolve(project_dir, overrides)?;
    for warning in config.validate() {
        warn!(%warning, "configuration warning");
    }

    start_server(ServerConfig::from(&config)).await
}
