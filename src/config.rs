//! TOML configuration for the poller binary.
//!
//! ```toml
//! [station]
//! protocol = "network"
//! link = "192.168.1.40:22222"
//! model = "Vantage Pro2 Plus"
//! interval = 30
//!
//! [home_assistant]
//! url = "http://homeassistant.local:8123"
//! token = "..."
//!
//! [logging]
//! filter = "davis_vantage=debug"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::coordinator::{DEFAULT_SYNC_INTERVAL, MINIMAL_SYNC_INTERVAL};
use crate::link::Link;
use crate::logger::MessageLogMode;
use crate::types::{LinkProtocol, StationModel};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub station: StationConfig,
    #[serde(default)]
    pub home_assistant: Option<HomeAssistantConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub protocol: LinkProtocol,
    /// `host:port` for network links, device path for serial links.
    pub link: String,
    #[serde(default)]
    pub model: StationModel,
    /// Seconds between polls.
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default)]
    pub persistent_connection: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HomeAssistantConfig {
    pub url: String,
    pub token: String,
    /// Prefix of unique ids. Generated when missing.
    #[serde(default)]
    pub entry_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Path of the NDJSON message log.
    #[serde(default)]
    pub message_log: Option<String>,
    #[serde(default)]
    pub message_log_mode: MessageLogMode,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            message_log: None,
            message_log_mode: MessageLogMode::default(),
        }
    }
}

fn default_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL.as_secs()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.station.link.trim().is_empty() {
            return Err(Error::Config("station.link must not be empty".into()));
        }
        if self.station.interval < MINIMAL_SYNC_INTERVAL.as_secs() {
            return Err(Error::Config(format!(
                "station.interval must be at least {} seconds",
                MINIMAL_SYNC_INTERVAL.as_secs()
            )));
        }
        if self.station.timeout_secs == 0 {
            return Err(Error::Config("station.timeout_secs must be positive".into()));
        }
        self.link()?;
        Ok(())
    }

    pub fn link(&self) -> Result<Link> {
        Link::from_protocol(self.station.protocol, self.station.link.trim())
    }
}

impl StationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
            [station]
            link = "192.168.1.40:22222"
            "#,
        )
        .unwrap();
        assert_eq!(config.station.protocol, LinkProtocol::Network);
        assert_eq!(config.station.model, StationModel::VantagePro2);
        assert_eq!(config.station.interval(), Duration::from_secs(30));
        assert_eq!(config.station.timeout(), Duration::from_secs(5));
        assert!(!config.station.persistent_connection);
        assert!(config.home_assistant.is_none());
        assert_eq!(config.logging.filter, "info");
        assert_eq!(config.logging.message_log_mode, MessageLogMode::Full);
        assert_eq!(
            config.link().unwrap(),
            Link::Tcp {
                host: "192.168.1.40".into(),
                port: 22222
            }
        );
    }

    #[test]
    fn full_config() {
        let config = Config::parse(
            r#"
            [station]
            protocol = "serial"
            link = "/dev/ttyUSB0"
            model = "Vantage Pro2 Plus"
            interval = 60
            persistent_connection = true

            [home_assistant]
            url = "http://ha.local:8123"
            token = "secret"
            entry_id = "01J0ABC"

            [logging]
            filter = "davis_vantage=debug"
            message_log = "/var/log/davis.ndjson"
            message_log_mode = "diffed"
            "#,
        )
        .unwrap();
        assert_eq!(config.station.model, StationModel::VantagePro2Plus);
        assert_eq!(
            config.link().unwrap(),
            Link::Serial {
                path: "/dev/ttyUSB0".into(),
                baud: 19200
            }
        );
        let ha = config.home_assistant.unwrap();
        assert_eq!(ha.entry_id.as_deref(), Some("01J0ABC"));
        assert_eq!(config.logging.message_log_mode, MessageLogMode::Diffed);
    }

    #[test]
    fn rejects_short_interval_and_empty_link() {
        let short = Config::parse("[station]\nlink = \"host:22222\"\ninterval = 4\n");
        assert!(matches!(short, Err(Error::Config(_))));
        let empty = Config::parse("[station]\nlink = \"  \"\n");
        assert!(matches!(empty, Err(Error::Config(_))));
        let bad_port = Config::parse("[station]\nlink = \"host:notaport\"\n");
        assert!(matches!(bad_port, Err(Error::InvalidLink(_))));
    }
}
