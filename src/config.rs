use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub onebot: OneBotConfig,
    pub license: LicenseConfig,
    /// Static admin allowlist for roster commands.
    #[serde(default)]
    pub admins: Vec<i64>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OneBotConfig {
    /// Base URL of the OneBot HTTP API, e.g. "http://127.0.0.1:3000".
    pub api_base_url: String,
    pub access_token: Option<String>,
    /// Address the event webhook listens on.
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LicenseConfig {
    pub api_base_url: String,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
}

impl LicenseConfig {
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(10)
    }

    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(3)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    pub log_level: Option<String>,
    /// Delay between member-list pages, to stay under platform rate limits.
    pub page_delay_ms: Option<u64>,
    /// Delay between groups in batch operations.
    pub group_delay_ms: Option<u64>,
}

impl RuntimeConfig {
    pub fn log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "info".into())
    }

    pub fn page_delay_ms(&self) -> u64 {
        self.page_delay_ms.unwrap_or(500)
    }

    pub fn group_delay_ms(&self) -> u64 {
        self.group_delay_ms.unwrap_or(1000)
    }
}

pub fn load_config(path: &PathBuf) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: Config = serde_yaml::from_str(&text).context("parse yaml")?;
    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.onebot.api_base_url.trim().is_empty() {
        return Err(anyhow!("onebot.api_base_url is empty"));
    }
    if cfg.license.api_base_url.trim().is_empty() {
        return Err(anyhow!("license.api_base_url is empty"));
    }
    cfg.onebot
        .listen_addr
        .parse::<std::net::SocketAddr>()
        .with_context(|| format!("bad listen_addr '{}'", cfg.onebot.listen_addr))?;
    let timeout = cfg.license.timeout_secs();
    if timeout == 0 || timeout > 300 {
        return Err(anyhow!(
            "license.timeout_secs={} out of range (1..=300)",
            timeout
        ));
    }
    Ok(())
}

pub fn parse_config_arg(args: &[String]) -> Option<PathBuf> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            return Some(PathBuf::from(&args[i + 1]));
        }
        i += 1;
    }
    None
}
