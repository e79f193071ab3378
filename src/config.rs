use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::review::ReviewLimits;
use crate::versions::RuntimeEnv;
use crate::workflow::WorkflowSettings;
use crate::MarketplaceSettings;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bind address (default: "0.0.0.0")
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port number (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Storage backend
    #[serde(default)]
    pub store: StoreConfig,
    /// Host runtime and platform versions of this deployment
    #[serde(default)]
    pub runtime: RuntimeEnv,
    /// Review pipeline limits
    #[serde(default)]
    pub review: ReviewLimits,
    #[serde(default)]
    pub workflow: WorkflowSettings,
    #[serde(default)]
    pub events: EventsConfig,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    Filesystem { path: PathBuf },
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Filesystem {
            path: PathBuf::from("./data"),
        }
    }
}

/// Lifecycle event delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Buffered events per subscriber (default: 256)
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            store: StoreConfig::default(),
            runtime: RuntimeEnv::default(),
            review: ReviewLimits::default(),
            workflow: WorkflowSettings::default(),
            events: EventsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and CLI arguments
    pub fn load(
        config_path: Option<&PathBuf>,
        cli_bind: Option<&str>,
        cli_port: Option<u16>,
        cli_store_path: Option<&PathBuf>,
    ) -> anyhow::Result<Self> {
        // Start with default config
        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            // Try default config file
            if let Ok(content) = std::fs::read_to_string("stallkeep.toml") {
                toml::from_str(&content)?
            } else {
                Config::default()
            }
        };

        config.apply_env(|key| std::env::var(key).ok());

        // Override with CLI arguments
        if let Some(bind) = cli_bind {
            config.bind = bind.to_string();
        }
        if let Some(port) = cli_port {
            config.port = port;
        }
        if let Some(path) = cli_store_path {
            config.store = StoreConfig::Filesystem { path: path.clone() };
        }

        Ok(config)
    }

    /// Override fields from `STALLKEEP_*` variables looked up through `var`.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = var("STALLKEEP_BIND") {
            self.bind = bind;
        }
        if let Some(port) = var("STALLKEEP_PORT") {
            if let Ok(p) = port.parse() {
                self.port = p;
            }
        }
        if let Some(path) = var("STALLKEEP_STORE_PATH") {
            self.store = StoreConfig::Filesystem {
                path: PathBuf::from(path),
            };
        }
        if let Some(host) = var("STALLKEEP_HOST_VERSION") {
            self.runtime.host_version = host;
        }
        if let Some(platform) = var("STALLKEEP_PLATFORM_VERSION") {
            self.runtime.platform_version = platform;
        }
    }

    pub fn marketplace_settings(&self) -> MarketplaceSettings {
        MarketplaceSettings {
            runtime: self.runtime.clone(),
            review: self.review.clone(),
            workflow: self.workflow.clone(),
            event_capacity: self.events.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            port = 9090

            [store]
            type = "memory"

            [runtime]
            host_version = "8.2.0"

            [workflow]
            changes_deadline_days = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 9090);
        assert!(matches!(config.store, StoreConfig::Memory));
        assert_eq!(config.runtime.host_version, "8.2.0");
        assert_eq!(config.runtime.platform_version, "1.0.0");
        assert_eq!(config.workflow.changes_deadline_days, 7);
        assert_eq!(config.review.max_files, 5000);
        assert_eq!(config.events.capacity, 256);
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("STALLKEEP_PORT", "7000"),
            ("STALLKEEP_STORE_PATH", "/var/lib/stallkeep"),
            ("STALLKEEP_PLATFORM_VERSION", "2.1.0"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.port, 7000);
        assert!(matches!(
            config.store,
            StoreConfig::Filesystem { ref path } if path == &PathBuf::from("/var/lib/stallkeep")
        ));
        assert_eq!(config.runtime.platform_version, "2.1.0");
        assert_eq!(config.runtime.host_version, "8.3.0");
    }
}
