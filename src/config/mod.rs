// Configuration loading and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::invoke::InvokeProtocol;
use crate::probe::{FailurePolicy, ProbeMode};

pub const PROD: &str = "prod";
#[allow(dead_code)]
pub const DEV: &str = "dev";
#[allow(dead_code)]
pub const TEST: &str = "test";

pub const DEFAULT_COORDINATOR_URL: &str = "http://127.0.0.1:8080/api";
pub const DEFAULT_COORDINATOR_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8081";
pub const DEFAULT_PREFERENCES_PATH: &str = ".cpsclient/preference.json";
pub const DEFAULT_LABEL: &str = "client";

/// Config files tried, in order, when none is given explicitly.
pub const LOOKUP_PATHS: [&str; 2] = ["cfg/cpsclient.cfg.local.yaml", "cfg/cpsclient.cfg.yaml"];

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Client {
    #[serde(rename = "client")]
    pub client: ClientBox,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientBox {
    #[serde(default = "default_env")]
    pub env: String,
    pub logs: Option<Logs>,
    pub coordinator: Option<Coordinator>,
    pub origin: Option<String>,
    pub probe: Option<Probe>,
    pub invoke: Option<Invoke>,
    pub preferences: Option<Preferences>,
    pub transport: Option<Transport>,
}

impl Default for ClientBox {
    fn default() -> Self {
        Self {
            env: default_env(),
            logs: None,
            coordinator: None,
            origin: None,
            probe: None,
            invoke: None,
            preferences: None,
            transport: None,
        }
    }
}

fn default_env() -> String {
    DEV.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logs {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Coordinator {
    pub base_url: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub announce_selection: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Probe {
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub path: Option<String>,
    pub mode: Option<ProbeMode>,
    pub on_failure: Option<FailurePolicy>,
    #[serde(default, with = "humantime_serde")]
    pub budget: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Invoke {
    pub protocol: Option<InvokeProtocol>,
    pub model: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Preferences {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Transport {
    pub label: Option<String>,
}

// Config trait
pub trait ConfigTrait {
    fn logs(&self) -> Option<&Logs>;
    fn is_prod(&self) -> bool;
    #[allow(dead_code)]
    fn is_dev(&self) -> bool;
    #[allow(dead_code)]
    fn is_test(&self) -> bool;
    fn coordinator(&self) -> Option<&Coordinator>;
    fn probe(&self) -> Option<&Probe>;
    fn invoke(&self) -> Option<&Invoke>;
    fn coordinator_url(&self) -> Result<Url>;
    fn coordinator_timeout(&self) -> Duration;
    fn announce_selection(&self) -> bool;
    fn origin(&self) -> Result<Url>;
    fn preferences_path(&self) -> PathBuf;
    fn transport_label(&self) -> &str;
}

// Config type alias for convenience
pub type Config = Client;

impl ConfigTrait for Config {
    fn logs(&self) -> Option<&Logs> {
        self.client.logs.as_ref()
    }

    fn is_prod(&self) -> bool {
        self.client.env == PROD
    }

    fn is_dev(&self) -> bool {
        self.client.env == DEV
    }

    fn is_test(&self) -> bool {
        self.client.env == TEST
    }

    fn coordinator(&self) -> Option<&Coordinator> {
        self.client.coordinator.as_ref()
    }

    fn probe(&self) -> Option<&Probe> {
        self.client.probe.as_ref()
    }

    fn invoke(&self) -> Option<&Invoke> {
        self.client.invoke.as_ref()
    }

    fn coordinator_url(&self) -> Result<Url> {
        let raw = self
            .coordinator()
            .and_then(|c| c.base_url.as_deref())
            .unwrap_or(DEFAULT_COORDINATOR_URL);
        let url = Url::parse(raw).with_context(|| format!("invalid coordinator.base_url {:?}", raw))?;
        if url.cannot_be_a_base() {
            anyhow::bail!("coordinator.base_url {:?} is not a base URL", raw);
        }
        Ok(url)
    }

    fn coordinator_timeout(&self) -> Duration {
        self.coordinator()
            .and_then(|c| c.timeout)
            .unwrap_or(DEFAULT_COORDINATOR_TIMEOUT)
    }

    fn announce_selection(&self) -> bool {
        self.coordinator().map(|c| c.announce_selection).unwrap_or(false)
    }

    fn origin(&self) -> Result<Url> {
        let raw = self.client.origin.as_deref().unwrap_or(DEFAULT_ORIGIN);
        let url = Url::parse(raw).with_context(|| format!("invalid origin {:?}", raw))?;
        if url.host_str().is_none() {
            anyhow::bail!("origin {:?} has no host", raw);
        }
        Ok(url)
    }

    fn preferences_path(&self) -> PathBuf {
        self.client
            .preferences
            .as_ref()
            .and_then(|p| p.path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PREFERENCES_PATH))
    }

    fn transport_label(&self) -> &str {
        self.client
            .transport
            .as_ref()
            .and_then(|t| t.label.as_deref())
            .unwrap_or(DEFAULT_LABEL)
    }
}

impl Config {
    /// Loads configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Resolve absolute path
        let abs_path = path
            .canonicalize()
            .with_context(|| format!("failed to resolve absolute config filepath: {:?}", path))?;

        let data = std::fs::read_to_string(&abs_path)
            .with_context(|| format!("read config yaml file {:?}", abs_path))?;

        Self::parse(&data).with_context(|| format!("unmarshal yaml from {:?}", abs_path))
    }

    /// Parses configuration from YAML text.
    pub fn parse(data: &str) -> Result<Self> {
        let cfg: Client = serde_yaml::from_str(data)?;
        if let Some(probe) = cfg.probe() {
            if probe.path.as_deref().map(str::trim) == Some("") {
                anyhow::bail!("probe.path must not be empty");
            }
        }
        Ok(cfg)
    }

    /// Loads `explicit` if given, otherwise the first existing file of
    /// [`LOOKUP_PATHS`]; falls back to defaults when none exists.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        for candidate in LOOKUP_PATHS {
            let path = Path::new(candidate);
            if path.exists() {
                return Ok((Self::load(path)?, Some(path.to_path_buf())));
            }
        }
        Ok((Self::default(), None))
    }
}

// Test config is always available for integration tests
mod test_config;
#[allow(dead_code)]
pub use test_config::new_test_config;
