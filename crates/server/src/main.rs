use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use config::{APP_VERSION, Config, get_config};
use http::{HttpServer, TlsConfig};
use log::info;
use simple_logger::SimpleLogger;
use source::NightscoutSource;

mod http;
mod pages;
mod source;

pub struct AppState {
    pub config: Config,
    pub source: NightscoutSource,
}

pub type SharedState = Arc<AppState>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = get_config().context("failed to get config")?;

    SimpleLogger::new()
        .with_level(config.log_level)
        .init()
        .context("failed to initialize logger")?;

    info!("Starting Nightscout dashboard v{APP_VERSION}...");

    if config.nightscout_url.is_empty() {
        return Err(anyhow!("nightscout_url must be set in config.toml"));
    }

    let source = NightscoutSource::new(&config).context("failed to create Nightscout source")?;

    let tls_config = config.enable_tls.then(|| TlsConfig {
        cert_path: config.cert_path.clone(),
        key_path: config.key_path.clone(),
    });

    let port = config.http_port;
    let state = Arc::new(AppState { config, source });

    let http_server = HttpServer::new(port, tls_config, state).await?;

    http_server.run().await;

    Ok(())
}
