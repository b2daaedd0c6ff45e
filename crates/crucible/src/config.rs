//! Daemon configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then `CRUCIBLE_`
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the API listens on.
    pub host: String,

    /// Port the API listens on.
    pub port: u16,

    /// Directory for the per-plugin socket pairs.
    pub plugin_dir: PathBuf,

    /// Static file-server URL handed to plugins.
    pub fileserver_url: String,

    /// Deadline in seconds for a whole plugin load.
    pub plugin_load_timeout_secs: u64,

    /// Static operator token for API access; plugins always get their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9610,
            plugin_dir: std::env::temp_dir().join("crucible-plugins"),
            fileserver_url: "http://127.0.0.1:9611/".to_string(),
            plugin_load_timeout_secs: 30,
            api_token: None,
        }
    }
}

impl Config {
    /// Load configuration, layering file and environment over defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("CRUCIBLE_")).extract()
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_load_timeout_secs)
    }

    /// The API base URL advertised to plugins.
    ///
    /// A wildcard bind address is not dialable, so plugins are pointed at
    /// loopback in that case; they run on the same host by construction.
    pub fn api_url(&self) -> String {
        let host = if self.host == "0.0.0.0" || self.host == "::" {
            "127.0.0.1"
        } else {
            &self.host
        };
        format!("http://{host}:{}", self.port)
    }
}
