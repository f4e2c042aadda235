use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Public OneDev instance used when a source or destination omits its URL
pub const DEFAULT_URL: &str = "https://code.onedev.io/";

/// Main configuration structure for the mirror connector
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// OneDev instances to discover repositories from
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// OneDev instances to provision mirror projects on
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

/// One OneDev instance to discover repositories from
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SourceConfig {
    /// Base URL of the instance (defaults to the public instance)
    #[serde(default)]
    pub url: String,

    /// Credential set for this instance
    #[serde(flatten)]
    pub creds: Credentials,

    /// Target user whose projects are discovered (defaults to the
    /// authenticated user)
    #[serde(default)]
    pub user: String,

    /// Repository filtering configuration
    #[serde(default)]
    pub filter: FilterSettings,

    /// Repository names to include (empty means all)
    #[serde(default)]
    pub include: Vec<String>,

    /// Repository names to exclude; only consulted as a refinement of a
    /// non-empty include list
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Organization names whose child projects are also discovered
    #[serde(default)]
    pub include_orgs: Vec<String>,

    /// Organization names never expanded from group memberships
    #[serde(default)]
    pub exclude_orgs: Vec<String>,
}

/// One OneDev instance to provision mirror projects on
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DestinationConfig {
    /// Base URL of the instance (defaults to the public instance)
    #[serde(default)]
    pub url: String,

    /// Credential set for this instance
    #[serde(flatten)]
    pub creds: Credentials,
}

/// Credential set for one OneDev instance
///
/// Empty strings mean "not configured". Authentication mode selection is
/// handled by [`crate::client::Auth::select`].
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Bearer token
    #[serde(default)]
    pub token: String,

    /// Path to a file containing the bearer token
    #[serde(default)]
    pub token_file: String,
}

impl Credentials {
    /// Resolve the configured token, reading the token file if necessary
    pub fn resolve_token(&self) -> Result<Option<String>> {
        if !self.token.is_empty() {
            return Ok(Some(self.token.clone()));
        }
        if !self.token_file.is_empty() {
            let token = std::fs::read_to_string(&self.token_file)
                .with_context(|| format!("failed to read token file: {}", self.token_file))?;
            return Ok(Some(token.trim().to_string()));
        }
        Ok(None)
    }

    /// Password with the token back-filled when only a token was supplied.
    /// Used for the organization-expansion trigger, not for auth selection.
    pub fn effective_password(&self) -> &str {
        if self.password.is_empty() {
            &self.token
        } else {
            &self.password
        }
    }
}

/// Repository filtering configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FilterSettings {
    /// Skip projects that record a fork parent
    #[serde(default)]
    pub exclude_forks: bool,

    /// Maximum age of the latest default-branch commit, e.g. "365d"
    pub last_activity: Option<String>,
}

impl FilterSettings {
    /// Parse the configured activity duration. A zero duration means the
    /// activity filter is off.
    pub fn last_activity_duration(&self) -> Result<Duration> {
        match &self.last_activity {
            Some(raw) => parse_duration(raw),
            None => Ok(Duration::zero()),
        }
    }
}

/// Parse a duration string of the form `<integer><unit>` where the unit is
/// one of `s`, `m` (minutes), `h`, `d`, `w`, `y`
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let unit_start = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("duration {:?} is missing a unit", raw))?;

    let (value, unit) = raw.split_at(unit_start);
    let value: i64 = value
        .parse()
        .map_err(|_| anyhow!("duration {:?} has no numeric value", raw))?;

    let duration = match unit {
        "s" => Duration::try_seconds(value),
        "m" => Duration::try_minutes(value),
        "h" => Duration::try_hours(value),
        "d" => Duration::try_days(value),
        "w" => Duration::try_weeks(value),
        "y" => value.checked_mul(365).and_then(Duration::try_days),
        other => return Err(anyhow!("unknown duration unit {:?}", other)),
    };

    duration.ok_or_else(|| anyhow!("duration {:?} is out of range", raw))
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("onedev-mirror").join("config.yml"))
    }
}
