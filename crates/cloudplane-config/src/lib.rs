pub mod error;

pub use error::*;

use cloudplane_core::{Budgets, RateLimitConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_ENV: &str = "CLOUDPLANE_CONFIG";
pub const SECRET_ID_ENV: &str = "CLOUDPLANE_SECRET_ID";
pub const SECRET_KEY_ENV: &str = "CLOUDPLANE_SECRET_KEY";
pub const REGION_ENV: &str = "CLOUDPLANE_REGION";

const DEFAULT_REGION: &str = "ap-guangzhou";
const DEFAULT_ENDPOINT_SUFFIX: &str = "tencentcloudapi.com";

/// API key pair. Never printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub secret_id: String,
    pub secret_key: String,
    /// Session token for temporary credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Credentials {
    pub fn is_configured(&self) -> bool {
        !self.secret_id.is_empty() && !self.secret_key.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secret_id = match self.secret_id.get(..4) {
            Some(prefix) => format!("{prefix}***"),
            None if self.secret_id.is_empty() => String::new(),
            None => "***".to_string(),
        };
        f.debug_struct("Credentials")
            .field("secret_id", &secret_id)
            .field("secret_key", &"<redacted>")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// cloudplane configuration file (`cloudplane.yaml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub region: String,
    /// Domain the per-service endpoints live under, e.g. `cbs.{suffix}`
    pub endpoint_suffix: String,
    pub credentials: Credentials,
    pub rate_limit: RateLimitConfig,
    pub budgets: Budgets,
    /// Per-request HTTP timeout in seconds
    pub request_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint_suffix: DEFAULT_ENDPOINT_SUFFIX.to_string(),
            credentials: Credentials::default(),
            rate_limit: RateLimitConfig::default(),
            budgets: Budgets::default(),
            request_timeout: 30,
        }
    }
}

impl Config {
    /// Load from `explicit` if given, otherwise from the first discovered
    /// config file, otherwise defaults. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) if path.exists() => Some(path.to_path_buf()),
            Some(path) => return Err(ConfigError::ConfigFileMissing(path.to_path_buf())),
            None => match find_config_file() {
                Ok(path) => Some(path),
                Err(ConfigError::ConfigFileNotFound) => None,
                Err(e) => return Err(e),
            },
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without applying environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Apply `CLOUDPLANE_SECRET_ID`, `CLOUDPLANE_SECRET_KEY` and `CLOUDPLANE_REGION`.
    pub fn apply_env(&mut self) {
        if let Some(secret_id) = non_empty_env(SECRET_ID_ENV) {
            self.credentials.secret_id = secret_id;
        }
        if let Some(secret_key) = non_empty_env(SECRET_KEY_ENV) {
            self.credentials.secret_key = secret_key;
        }
        if let Some(region) = non_empty_env(REGION_ENV) {
            self.region = region;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::Invalid("region must not be empty".into()));
        }
        if self.endpoint_suffix.trim().is_empty() || self.endpoint_suffix.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "endpoint_suffix '{}' must be a bare domain",
                self.endpoint_suffix
            )));
        }
        if self.request_timeout == 0 {
            return Err(ConfigError::Invalid("request_timeout must be positive".into()));
        }
        self.budgets.validate().map_err(ConfigError::Invalid)

    }

    /// Credentials, or an error telling the user how to set them.
    pub fn require_credentials(&self) -> Result<&Credentials> {
        if self.credentials.is_configured() {
            Ok(&self.credentials)
        } else {
            Err(ConfigError::MissingCredentials)
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Global config directory (`~/.config/cloudplane`)
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("cloudplane"))
}

/// Find the config file.
///
/// Search order:
/// 1. `CLOUDPLANE_CONFIG` (direct path)
/// 2. `./cloudplane.yaml`
/// 3. `./.cloudplane/config.yaml`
/// 4. `~/.config/cloudplane/config.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Some(config_path) = non_empty_env(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::ConfigFileMissing(path));
    }

    let current_dir = std::env::current_dir()?;
    for candidate in [
        current_dir.join("cloudplane.yaml"),
        current_dir.join(".cloudplane").join("config.yaml"),
    ] {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    if let Ok(config_dir) = get_config_dir() {
        let global_config = config_dir.join("config.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}
