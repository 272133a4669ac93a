//! Run configuration.
//!
//! Loaded from an explicit path or discovered in the working directory as
//! `parley.yml`, `parley.yaml` or `parley.json`. The token may be left out of
//! the file and supplied through `PARLEY_TOKEN` instead.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_proto::ChannelLocation;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Config file names tried, in order, during discovery.
pub const CONFIG_FILE_NAMES: [&str; 3] = ["parley.yml", "parley.yaml", "parley.json"];

/// Environment variable consulted when the config has no token.
pub const TOKEN_ENV: &str = "PARLEY_TOKEN";

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file found in {} (looked for {})", .0.display(), CONFIG_FILE_NAMES.join(", "))]
    NotFound(PathBuf),

    #[error("the path '{}' does not appear to be a valid path", .0.display())]
    MissingFile(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("{} appears to be an invalid config file (it is empty)", .0.display())]
    Empty(PathBuf),

    #[error("extension '{0}' is not supported (use .yml, .yaml or .json)")]
    UnsupportedExtension(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for a run.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    /// Prepended to every command.
    pub bot_prefix: String,
    /// User id of the bot under test.
    pub bot_test_id: String,
    pub channel_id: String,
    pub guild_id: String,
    /// Default correlation window for assertions.
    pub timeout_ms: u64,
    /// Upper bound on waiting for the client to become ready.
    pub login_timeout_ms: Option<u64>,
    /// Test files or directories searched for `*.test.{yml,yaml,json}`.
    pub test_files: Vec<PathBuf>,
    pub gateway_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Abort the run when a test file cannot be read, instead of skipping it.
    pub exit_on_file_reading_error: bool,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            bot_prefix: "!".to_string(),
            bot_test_id: String::new(),
            channel_id: String::new(),
            guild_id: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            login_timeout_ms: None,
            test_files: Vec::new(),
            gateway_url: "ws://127.0.0.1:8787/gateway".to_string(),
            token: None,
            exit_on_file_reading_error: false,
        }
    }
}

impl ParleyConfig {
    /// Loads from `explicit` (relative to `cwd`) or discovers a config file
    /// in `cwd`, then falls back to `PARLEY_TOKEN` for the token.
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => {
                let path = cwd.join(path);
                if !path.is_file() {
                    return Err(ConfigError::MissingFile(path));
                }
                path
            }
            None => Self::discover(cwd)?,
        };
        let mut config = Self::from_file(&path)?;
        config.apply_env_token(std::env::var(TOKEN_ENV).ok());
        Ok(config)
    }

    /// Finds the first known config file name in `dir`.
    pub fn discover(dir: &Path) -> Result<PathBuf, ConfigError> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| ConfigError::NotFound(dir.to_path_buf()))
    }

    /// Parses a YAML or JSON config file. An empty document is rejected.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let config = match extension.as_str() {
            "yml" | "yaml" => {
                let doc: serde_yaml::Value =
                    serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?;
                if doc.as_mapping().is_none_or(serde_yaml::Mapping::is_empty) {
                    return Err(ConfigError::Empty(path.to_path_buf()));
                }
                serde_yaml::from_value(doc).map_err(|e| parse_error(e.to_string()))?
            }
            "json" => {
                if content.trim().is_empty() {
                    return Err(ConfigError::Empty(path.to_path_buf()));
                }
                let doc: serde_json::Value =
                    serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?;
                if doc.as_object().is_none_or(serde_json::Map::is_empty) {
                    return Err(ConfigError::Empty(path.to_path_buf()));
                }
                serde_json::from_value(doc).map_err(|e| parse_error(e.to_string()))?
            }
            other => return Err(ConfigError::UnsupportedExtension(format!(".{}", other))),
        };
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Uses `env_token` when the file did not set a token.
    pub fn apply_env_token(&mut self, env_token: Option<String>) {
        if self.token.as_deref().is_none_or(|t| t.trim().is_empty()) {
            self.token = env_token.filter(|t| !t.trim().is_empty());
        }
    }

    /// Rejects configurations a run cannot start from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        for (name, value) in [
            ("bot_test_id", &self.bot_test_id),
            ("channel_id", &self.channel_id),
            ("guild_id", &self.guild_id),
        ] {
            if value.trim().is_empty() {
                missing.push(name);
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "missing {}",
                missing.join(", ")
            )));
        }
        if self.test_files.is_empty() {
            return Err(ConfigError::Invalid(
                "test_files must list at least one path".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn login_timeout(&self) -> Option<Duration> {
        self.login_timeout_ms.map(Duration::from_millis)
    }

    /// The channel commands are sent in.
    pub fn channel(&self) -> ChannelLocation {
        ChannelLocation::new(&self.channel_id).with_guild(&self.guild_id)
    }

    pub fn defaults(&self) -> AssertionDefaults {
        AssertionDefaults {
            bot_prefix: self.bot_prefix.clone(),
            timeout: self.timeout(),
            channel: self.channel(),
            bot_id: Some(self.bot_test_id.clone()).filter(|id| !id.is_empty()),
        }
    }

    /// The token with all but its ends hidden, for display.
    pub fn masked_token(&self) -> Option<String> {
        self.token.as_deref().map(mask)
    }

    /// A copy safe to print.
    pub fn redacted(&self) -> Self {
        Self {
            token: self.masked_token(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for ParleyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParleyConfig")
            .field("bot_prefix", &self.bot_prefix)
            .field("bot_test_id", &self.bot_test_id)
            .field("channel_id", &self.channel_id)
            .field("guild_id", &self.guild_id)
            .field("timeout_ms", &self.timeout_ms)
            .field("login_timeout_ms", &self.login_timeout_ms)
            .field("test_files", &self.test_files)
            .field("gateway_url", &self.gateway_url)
            .field("token", &self.masked_token())
            .field("exit_on_file_reading_error", &self.exit_on_file_reading_error)
            .finish()
    }
}

fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "****".to_string()
    }
}

/// What every assertion in a run starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionDefaults {
    pub bot_prefix: String,
    pub timeout: Duration,
    pub channel: ChannelLocation,
    pub bot_id: Option<String>,
}

impl Default for AssertionDefaults {
    fn default() -> Self {
        Self {
            bot_prefix: String::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            channel: ChannelLocation::default(),
            bot_id: None,
        }
    }
}
