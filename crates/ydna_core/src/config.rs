//! Application configuration.
//!
//! Load order: TOML file (`ydna.toml` unless overridden) -> `YDNA_*`
//! environment variables -> validation. Every section is optional.

use crate::remote::geni::GeniClientConfig;
use crate::remote::throttle::RetryPolicy;
use crate::service::propagation::{ConflictPolicy, DEFAULT_MAX_GENERATIONS};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "ydna.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub geni: GeniConfig,
    pub propagation: PropagationConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ydna.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace|debug|info|warn|error`; build-mode default when unset.
    pub level: Option<String>,
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeniConfig {
    pub base_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub token_file: PathBuf,
    /// Fixed bearer token; skips the token file when set.
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GeniConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.geni.com".to_string(),
            client_id: None,
            client_secret: None,
            redirect_uri: "http://localhost:8080/callback".to_string(),
            token_file: PathBuf::from("geni_token.json"),
            access_token: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    pub max_generations_up: u32,
    pub max_generations_down: u32,
    /// Source labels, highest priority first. Empty records every conflict.
    pub source_priority: Vec<String>,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_generations_up: DEFAULT_MAX_GENERATIONS,
            max_generations_down: DEFAULT_MAX_GENERATIONS,
            source_priority: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Minimum spacing between remote requests.
    pub delay_secs: f64,
    pub max_attempts: u32,
    pub backoff_base_secs: f64,
    pub backoff_max_secs: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            delay_secs: 3.0,
            max_attempts: 5,
            backoff_base_secs: 5.0,
            backoff_max_secs: 120.0,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        message: String,
    },
    InvalidEnv {
        var: &'static str,
        value: String,
    },
    Invalid(String),
    /// Remote access needs an access token or OAuth client credentials.
    MissingCredentials,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config `{}`: {source}", path.display())
            }
            Self::Parse { path, message } => {
                write!(f, "invalid config `{}`: {message}", path.display())
            }
            Self::InvalidEnv { var, value } => {
                write!(f, "invalid value `{value}` for environment variable {var}")
            }
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
            Self::MissingCredentials => write!(
                f,
                "missing Geni credentials: set geni.client_id and geni.client_secret, or YDNA_GENI_ACCESS_TOKEN"
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl AppConfig {
    /// Loads `path`, or `ydna.toml` in the working directory when `None`.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content).map_err(|message| ConfigError::Parse {
                path: path.clone(),
                message,
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => Self::default(),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|err| err.to_string())
    }

    /// Applies `YDNA_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |var: &'static str| {
            lookup(var)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(path) = read("YDNA_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = read("YDNA_LOG_LEVEL") {
            self.logging.level = Some(level);
        }
        if let Some(raw) = read("YDNA_REQUEST_DELAY_SECS") {
            self.rate_limit.delay_secs = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "YDNA_REQUEST_DELAY_SECS",
                value: raw.clone(),
            })?;
        }
        if let Some(token) = read("YDNA_GENI_ACCESS_TOKEN") {
            self.geni.access_token = Some(token);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database.path is empty".to_string()));
        }
        if self.geni.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("geni.base_url is empty".to_string()));
        }
        if self.propagation.max_generations_up == 0 || self.propagation.max_generations_down == 0
        {
            return Err(ConfigError::Invalid(
                "propagation generation limits must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_attempts must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("rate_limit.delay_secs", self.rate_limit.delay_secs),
            ("rate_limit.backoff_base_secs", self.rate_limit.backoff_base_secs),
            ("rate_limit.backoff_max_secs", self.rate_limit.backoff_max_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            min_interval: Duration::from_secs_f64(self.rate_limit.delay_secs),
            max_attempts: self.rate_limit.max_attempts,
            backoff_base: Duration::from_secs_f64(self.rate_limit.backoff_base_secs),
            backoff_max: Duration::from_secs_f64(self.rate_limit.backoff_max_secs),
        }
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        ConflictPolicy::new(self.propagation.source_priority.iter().cloned())
    }

    /// Client settings for commands that reach the remote service.
    pub fn geni_client_config(&self) -> Result<GeniClientConfig, ConfigError> {
        let has = |value: &Option<String>| {
            value
                .as_deref()
                .map(|value| !value.trim().is_empty())
                .unwrap_or(false)
        };
        let has_client = has(&self.geni.client_id) && has(&self.geni.client_secret);
        if !has(&self.geni.access_token) && !has_client {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(GeniClientConfig {
            base_url: self.geni.base_url.trim().to_string(),
            client_id: self.geni.client_id.clone(),
            client_secret: self.geni.client_secret.clone(),
            redirect_uri: self.geni.redirect_uri.clone(),
            token_file: self.geni.token_file.clone(),
            access_token: self.geni.access_token.clone(),
            timeout: Duration::from_secs(self.geni.timeout_secs.max(1)),
        })
    }
}
