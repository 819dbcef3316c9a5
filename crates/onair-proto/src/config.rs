use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Sent with every stream request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Passed to mpv as `--network-timeout`; the daemon itself never times
    /// out an open.
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,
    /// Interval of the now-playing refresh tick while a stream plays.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Optional image shown on the now-playing surface when a track has
    /// no artwork of its own.
    #[serde(default)]
    pub artwork_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// JSON endpoint polled when the polled-metadata stream starts.
    #[serde(default = "default_metadata_endpoint")]
    pub endpoint: String,
    /// Title shown alongside the polled episode name.
    #[serde(default = "default_title_label")]
    pub title_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Acts as the user's permission grant for desktop alerts.
    #[serde(default = "default_notifications_enabled")]
    pub enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            network_timeout_secs: default_network_timeout_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            artwork_path: None,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: default_metadata_endpoint(),
            title_label: default_title_label(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: default_notifications_enabled(),
        }
    }
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_user_agent() -> String {
    "Radio/1.0 (iOS)".to_string()
}

fn default_network_timeout_secs() -> u64 {
    30
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_metadata_endpoint() -> String {
    "https://radio-t.com/site-api/last/5".to_string()
}

fn default_title_label() -> String {
    "Radio".to_string()
}

fn default_notifications_enabled() -> bool {
    true
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            tracing::info!("Wrote default config to {:?}", config_path);
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8989);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.player.user_agent, "Radio/1.0 (iOS)");
        assert_eq!(config.player.tick_interval_ms, 1000);
        assert!(config.metadata.endpoint.ends_with("/site-api/last/5"));
        assert!(Config::config_path().ends_with("onair/config.toml"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [http]
            port = 9000

            [notifications]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.http.port, 9000);
        assert!(config.http.enabled);
        assert!(!config.notifications.enabled);
        assert_eq!(config.metadata.title_label, "Radio");
    }
}
