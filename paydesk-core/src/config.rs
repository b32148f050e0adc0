use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct PaydeskConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    /// Base URL clients use to reach stored media, e.g. "http://127.0.0.1:8780".
    pub public_base_url: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8780,
            public_base_url: "http://127.0.0.1:8780".to_string(),
        }
    }
}

/// Shared staff token checked on staff-only routes. A shared static secret,
/// not real authentication.
#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    pub token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            chat_id: String::new(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    /// Directory uploaded files are written to. "~" is expanded.
    pub dir: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            dir: "~/.paydesk/media".to_string(),
        }
    }
}

impl PaydeskConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}
