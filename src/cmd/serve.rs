//! `appforge serve`: run the HTTP job server.

use std::path::Path;

use anyhow::Result;

use appforge::config::AppforgeConfig;
use appforge::engine::Engine;
use appforge::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    project_dir: &Path,
    port: Option<u16>,
    host: Option<String>,
    offline: bool,
) -> Result<()> {
    let mut config = AppforgeConfig::resolve(project_dir)?;
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }

    let server_config = ServerConfig::from(config.server.clone());
    let engine = Engine::from_config(config, offline);
    start_server(engine.queue.clone(), server_config).await
}
