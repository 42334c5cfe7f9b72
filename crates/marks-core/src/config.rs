//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/marks/config.toml)
//! 3. Environment variables (MARKS_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "MARKS";

/// Which bookmark store to talk to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// SQLite table in the data directory
    #[default]
    Local,
    /// Hosted backend (REST API + realtime feed)
    Supabase,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Local => write!(f, "local"),
            Backend::Supabase => write!(f, "supabase"),
        }
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Backend::Local),
            "supabase" => Ok(Backend::Supabase),
            other => bail!("Unknown backend '{}'. Use 'local' or 'supabase'.", other),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for local data (SQLite table, cross-tab signals)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Bookmark store to use
    #[serde(default)]
    pub backend: Backend,

    /// Hosted backend project URL (https://<project>.supabase.co)
    #[serde(default)]
    pub supabase_url: Option<String>,

    /// Hosted backend public API key
    #[serde(default)]
    pub supabase_key: Option<String>,

    /// Access token issued by the identity provider
    #[serde(default)]
    pub access_token: Option<String>,

    /// Signed-in user id (overrides the token subject)
    #[serde(default)]
    pub user_id: Option<String>,

    /// Signed-in user email
    #[serde(default)]
    pub email: Option<String>,

    /// Whether to notify other running instances of changes
    #[serde(default = "default_cross_tab")]
    pub cross_tab: bool,

    /// Log file (stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: Backend::default(),
            supabase_url: None,
            supabase_key: None,
            access_token: None,
            user_id: None,
            email: None,
            cross_tab: default_cross_tab(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (MARKS_DATA_DIR, MARKS_BACKEND, ...)
    /// 2. Config file (~/.config/marks/config.toml or MARKS_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(val) = env_var("DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }

        if let Some(val) = env_var("BACKEND") {
            self.backend = val.parse()?;
        }

        if let Some(val) = env_var("SUPABASE_URL") {
            self.supabase_url = non_empty(val);
        }

        if let Some(val) = env_var("SUPABASE_KEY") {
            self.supabase_key = non_empty(val);
        }

        if let Some(val) = env_var("ACCESS_TOKEN") {
            self.access_token = non_empty(val);
        }

        if let Some(val) = env_var("USER_ID") {
            self.user_id = non_empty(val);
        }

        if let Some(val) = env_var("EMAIL") {
            self.email = non_empty(val);
        }

        if let Some(val) = env_var("CROSS_TAB") {
            self.cross_tab = val.eq_ignore_ascii_case("true") || val == "1";
        }

        Ok(())
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Set a value by key, as used by `marks config set`
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "backend" => self.backend = value.parse()?,
            "supabase_url" => self.supabase_url = cleared(value),
            "supabase_key" => self.supabase_key = cleared(value),
            "access_token" => self.access_token = cleared(value),
            "user_id" => self.user_id = cleared(value),
            "email" => self.email = cleared(value),
            "cross_tab" => {
                self.cross_tab = value
                    .parse()
                    .context("Invalid value for cross_tab. Use 'true' or 'false'.")?;
            }
            "log_file" => self.log_file = cleared(value).map(PathBuf::from),
            _ => bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: {}",
                key,
                Self::KEYS.join(", ")
            ),
        }
        Ok(())
    }

    /// Keys accepted by [`Config::set`]
    pub const KEYS: &'static [&'static str] = &[
        "data_dir",
        "backend",
        "supabase_url",
        "supabase_key",
        "access_token",
        "user_id",
        "email",
        "cross_tab",
        "log_file",
    ];

    /// Get the config file path
    ///
    /// Can be overridden with MARKS_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Some(path) = env_var("CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("marks")
            .join("config.toml")
    }

    /// Get the path to the local SQLite table
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("marks.db")
    }

    /// Get the directory used for cross-tab signals
    pub fn signal_dir(&self) -> PathBuf {
        self.data_dir.join("signals")
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, name)).ok()
}

fn non_empty(val: String) -> Option<String> {
    if val.is_empty() {
        None
    } else {
        Some(val)
    }
}

/// Empty string or "none" clears an optional value
fn cleared(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("marks")
}

fn default_cross_tab() -> bool {
    true
}
