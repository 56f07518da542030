use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

mod commands;
mod config;
mod export;
mod extract;
mod handler;
mod license;
mod onebot;
mod roster;
mod server;
#[cfg(test)]
mod testutil;

use crate::config::{load_config, parse_config_arg, validate_config};
use crate::license::LicenseClient;
use crate::onebot::{GroupHost, OneBotClient};
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = parse_config_arg(&args).unwrap_or_else(|| PathBuf::from("config.yaml"));

    let cfg = load_config(&config_path)?;
    validate_config(&cfg)?;

    tracing_subscriber::fmt()
        .with_env_filter(cfg.runtime.log_level())
        .init();

    let host = Arc::new(OneBotClient::new(&cfg.onebot)?);
    let authority = Arc::new(LicenseClient::new(&cfg.license)?);

    match host.login_id().await {
        Ok(bot_qq) => info!("connected to onebot api as {}", bot_qq),
        Err(e) => warn!("get_login_info failed at startup: {}", e),
    }
    info!(
        "license api at {}, {} admins configured",
        cfg.license.api_base_url,
        cfg.admins.len()
    );

    let listen = cfg.onebot.listen_addr.parse()?;
    let state = Arc::new(AppState {
        host,
        authority,
        admins: cfg.admins.clone(),
        page_delay: std::time::Duration::from_millis(cfg.runtime.page_delay_ms()),
        group_delay: std::time::Duration::from_millis(cfg.runtime.group_delay_ms()),
    });

    server::run(state, listen).await
}
