//! Relay configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::expand::RetryPolicy;

/// Name of the config file looked up in the base directory
pub const CONFIG_FILE: &str = "config.yml";

/// Main relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upstream stream provider
    pub source: SourceConfig,

    /// Destination feed
    pub sink: SinkConfig,

    /// Credentials shared by source and sink
    pub credentials: CredentialsConfig,

    /// Bucket loop tuning
    pub relay: RelayConfig,

    /// Expansion cache sizing
    pub cache: CacheConfig,

    /// Link expander settings
    pub expanders: ExpandersConfig,
}

impl Config {
    /// Load configuration: explicit path, then `<base_dir>/config.yml`, then defaults
    pub fn load(config_path: Option<&PathBuf>, base_dir: &Path) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = base_dir.join(CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config)
                .context(format!("Failed to load config from {}", local_config.display()));
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::debug!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Fold command-line overrides into the loaded file values
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(secs) = cli.timeout {
            self.relay.poll_interval_secs = secs;
        }
        if let Some(username) = &cli.username {
            self.credentials.username = Some(username.clone());
        }
        if let Some(password) = &cli.password {
            self.credentials.password = Some(password.clone());
        }
        if let Some(keyword) = &cli.keyword {
            self.source.keyword = Some(keyword.clone());
        }
        if let Some(limit) = cli.max_activities {
            self.relay.max_activities = Some(limit);
        }
        if let Some(concurrency) = cli.concurrency {
            self.relay.concurrency = concurrency;
        }
    }

    /// Check the configuration before the relay starts
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.source.url.trim().is_empty() {
            return Err(eyre::eyre!("source.url is not set"));
        }
        if self.source.publisher.trim().is_empty() {
            return Err(eyre::eyre!("source.publisher is not set"));
        }
        if self.sink.publisher.trim().is_empty() {
            return Err(eyre::eyre!("sink.publisher is not set"));
        }
        if self.relay.concurrency == 0 {
            return Err(eyre::eyre!("relay.concurrency must be at least 1"));
        }
        if self.expanders.max_attempts == 0 {
            return Err(eyre::eyre!("expanders.max-attempts must be at least 1"));
        }
        self.credentials()?;
        Ok(())
    }

    /// Resolve credentials, reading the password from the environment if needed
    pub fn credentials(&self) -> Result<Option<Credentials>> {
        let Some(username) = &self.credentials.username else {
            return Ok(None);
        };
        let password = match &self.credentials.password {
            Some(password) => password.clone(),
            None => std::env::var(&self.credentials.password_env).map_err(|_| {
                eyre::eyre!(
                    "No password for {}. Set credentials.password or the {} environment variable.",
                    username,
                    self.credentials.password_env
                )
            })?,
        };
        Ok(Some(Credentials {
            username: username.clone(),
            password,
        }))
    }

    /// Sink base URL, defaulting to the source's
    pub fn sink_url(&self) -> &str {
        self.sink.url.as_deref().unwrap_or(&self.source.url)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.expanders.max_attempts,
            initial_backoff: Duration::from_millis(self.expanders.initial_backoff_ms),
        }
    }
}

/// Resolved username and password
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Upstream provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Provider base URL
    pub url: String,

    /// Publisher (stream) name on the provider
    pub publisher: String,

    /// Server-side keyword filter
    pub keyword: Option<String>,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            publisher: String::new(),
            keyword: None,
            timeout_ms: 30_000,
        }
    }
}

/// Destination feed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Sink base URL (defaults to the source URL)
    pub url: Option<String>,

    /// Publisher name to post rewritten activities to
    pub publisher: String,
}

/// Provider credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username: Option<String>,

    /// Inline password (prefer `password-env`)
    pub password: Option<String>,

    /// Environment variable holding the password
    #[serde(rename = "password-env")]
    pub password_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            password_env: "LINKRELAY_PASSWORD".to_string(),
        }
    }
}

/// Bucket loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Seconds to wait before re-checking when caught up
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,

    /// Seconds to wait before retrying a failed bucket
    #[serde(rename = "retry-delay-secs")]
    pub retry_delay_secs: u64,

    /// Expansion workers per bucket
    pub concurrency: usize,

    /// Cap on activities processed per bucket
    #[serde(rename = "max-activities")]
    pub max_activities: Option<usize>,

    /// Tag appended to each rewritten activity's sources
    #[serde(rename = "provenance-tag")]
    pub provenance_tag: String,

    /// Save expander caches every N committed buckets
    #[serde(rename = "cache-save-every")]
    pub cache_save_every: u64,

    /// Polls for exit after `stop` sends SIGTERM
    #[serde(rename = "stop-attempts")]
    pub stop_attempts: u32,

    /// Milliseconds between those polls
    #[serde(rename = "stop-interval-ms")]
    pub stop_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            retry_delay_secs: 5,
            concurrency: 32,
            max_activities: None,
            provenance_tag: "linkrelay".to_string(),
            cache_save_every: 10,
            stop_attempts: 60,
            stop_interval_ms: 500,
        }
    }
}

/// Expansion cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries kept per expander
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: lrucache::DEFAULT_CAPACITY,
        }
    }
}

/// Link expander settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpandersConfig {
    /// Per-request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Attempts per lookup before giving up
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// First retry delay in milliseconds (doubles each retry)
    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    pub bitly: BitlyConfig,

    pub redirect: RedirectConfig,
}

impl Default for ExpandersConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_attempts: 5,
            initial_backoff_ms: 250,
            bitly: BitlyConfig::default(),
            redirect: RedirectConfig::default(),
        }
    }
}

/// bit.ly API expander
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BitlyConfig {
    /// API login; the expander is disabled without one
    pub login: Option<String>,

    #[serde(rename = "api-key")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// Extra short domains served by bit.ly
    pub domains: Vec<String>,
}

impl Default for BitlyConfig {
    fn default() -> Self {
        Self {
            login: None,
            api_key: None,
            api_key_env: "BITLY_API_KEY".to_string(),
            domains: Vec::new(),
        }
    }
}

impl BitlyConfig {
    /// Login and API key, if both are available
    pub fn resolve(&self) -> Option<(String, String)> {
        let login = self.login.clone()?;
        let api_key = self
            .api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())?;
        Some((login, api_key))
    }
}

/// Catch-all redirect-following expander
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    pub enabled: bool,

    /// Redirects followed per URL
    #[serde(rename = "max-hops")]
    pub max_hops: u32,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_hops: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;
    use tempfile::TempDir;

    fn valid() -> Config {
        let mut config = Config::default();
        config.source.url = "https://stream.example.com".to_string();
        config.source.publisher = "twitter".to_string();
        config.sink.publisher = "twitter-expanded".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.relay.poll_interval_secs, 60);
        assert_eq!(config.relay.concurrency, 32);
        assert_eq!(config.relay.max_activities, None);
        assert_eq!(config.cache.capacity, lrucache::DEFAULT_CAPACITY);
        assert!(config.expanders.redirect.enabled);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
source:
  url: https://stream.example.com
  publisher: twitter
  keyword: rust
sink:
  publisher: twitter-expanded
credentials:
  username: relay
  password: hunter2
relay:
  poll-interval-secs: 30
  concurrency: 8
  max-activities: 100
expanders:
  max-attempts: 3
  bitly:
    login: me
    api-key: abc
    domains: [amzn.to]
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.source.keyword.as_deref(), Some("rust"));
        assert_eq!(config.relay.poll_interval_secs, 30);
        assert_eq!(config.relay.max_activities, Some(100));
        assert_eq!(config.relay.retry_delay_secs, 5);
        assert_eq!(config.expanders.max_attempts, 3);
        assert_eq!(config.expanders.bitly.domains, vec!["amzn.to"]);
        assert_eq!(config.sink_url(), "https://stream.example.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_source() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("source.url"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = valid();
        config.relay.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_username_means_anonymous() {
        assert_eq!(valid().credentials().unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_password_from_environment() {
        let mut config = valid();
        config.credentials.username = Some("relay".to_string());
        config.credentials.password_env = "LINKRELAY_TEST_PASSWORD".to_string();

        assert!(config.credentials().is_err());

        // SAFETY: serialized with other environment-touching tests
        unsafe {
            std::env::set_var("LINKRELAY_TEST_PASSWORD", "s3cret");
        }
        let creds = config.credentials();
        // SAFETY: serialized with other environment-touching tests
        unsafe {
            std::env::remove_var("LINKRELAY_TEST_PASSWORD");
        }

        assert_eq!(creds.unwrap().unwrap().password, "s3cret");
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let mut config = valid();
        let cli = Cli::parse_from([
            "lr",
            "--timeout",
            "5",
            "--keyword",
            "golang",
            "--max-activities",
            "10",
            "--concurrency",
            "4",
            "--username",
            "bob",
        ]);

        config.apply_overrides(&cli);

        assert_eq!(config.relay.poll_interval_secs, 5);
        assert_eq!(config.source.keyword.as_deref(), Some("golang"));
        assert_eq!(config.relay.max_activities, Some(10));
        assert_eq!(config.relay.concurrency, 4);
        assert_eq!(config.credentials.username.as_deref(), Some("bob"));
    }

    #[test]
    fn test_load_prefers_base_dir_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = valid();
        config.relay.poll_interval_secs = 7;
        fs::write(temp_dir.path().join(CONFIG_FILE), serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = Config::load(None, temp_dir.path()).unwrap();
        assert_eq!(loaded.relay.poll_interval_secs, 7);

        let empty = TempDir::new().unwrap();
        let defaults = Config::load(None, empty.path()).unwrap();
        assert_eq!(defaults.relay.poll_interval_secs, 60);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "u".to_string(),
            password: "p4ss".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("p4ss"));
    }
}
