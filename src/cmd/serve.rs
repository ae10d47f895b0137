//! Relay server command: `relaycode serve`.

use anyhow::Result;
use std::path::PathBuf;

use relaycode::config::RelayConfig;
use relaycode::relay::seed::SeedSource;
use relaycode::relay::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    settings: RelayConfig,
    port: Option<u16>,
    host: Option<String>,
    seed: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    let server = ServerConfig {
        host: host.unwrap_or_else(|| settings.server.host.clone()),
        port: port.unwrap_or(settings.server.port),
        seed: SeedSource::from_path(seed.or_else(|| settings.server.seed.clone())),
        dev_mode: dev || settings.server.dev_mode,
    };

    start_server(server, &settings).await
}
