use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

const NAMECHEAP_API: &str = "https://api.namecheap.com/xml.response";
const NAMECHEAP_SANDBOX: &str = "https://api.sandbox.namecheap.com/xml.response";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub namecheap: NamecheapConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_static_dir() -> String {
    "public".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            static_dir: default_static_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamecheapConfig {
    /// Overrides the production/sandbox URL when set.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub sandbox: bool,
    /// Pause after each domain, keeps us under Namecheap's rate limit.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_request_delay_ms() -> u64 {
    2000
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for NamecheapConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            sandbox: false,
            request_delay_ms: default_request_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl NamecheapConfig {
    pub fn endpoint(&self) -> &str {
        match self.endpoint.as_deref() {
            Some(url) => url,
            None if self.sandbox => NAMECHEAP_SANDBOX,
            None => NAMECHEAP_API,
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
