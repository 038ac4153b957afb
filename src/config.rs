use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cli::{RemoteArgs, SyncFlags};
use crate::identity::{ApiKey, IdentityError};
use crate::retry::{RetryConfig, DEFAULT_RETRY_STATUSES};
use crate::sync::SyncOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No API keys configured; set PHOTOMIRROR_API_KEYS or pass --api-key")]
    NoCredentials,

    #[error(transparent)]
    InvalidCredential(#[from] IdentityError),

    #[error("--batch-size must be at least 1")]
    InvalidBatchSize,

    #[error("--per-page must be between 1 and 500, got {0}")]
    InvalidPerPage(u32),

    #[error("--index-only fetches nothing, so --batch-size {0} makes no sense")]
    IndexOnlyWithBatch(usize),

    #[error("Invalid proxy URL '{0}'")]
    InvalidProxy(String),
}

/// Validated configuration of a syncing command.
pub struct Config {
    pub directory: PathBuf,
    pub api_keys: Vec<ApiKey>,
    pub user_agents: Vec<String>,
    pub proxies: Vec<String>,
    pub api_base_url: String,
    pub retry: RetryConfig,
    pub timeout: Duration,
    pub download_timeout: Duration,
    pub batch_size: usize,
    pub per_page: u32,
    pub options: SyncOptions,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("directory", &self.directory)
            .field("api_keys", &format_args!("<{} redacted>", self.api_keys.len()))
            .field("user_agents", &self.user_agents.len())
            .field("proxies", &self.proxies.len())
            .field("api_base_url", &self.api_base_url)
            .field("batch_size", &self.batch_size)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(flags: SyncFlags, remote: RemoteArgs) -> Result<Self, ConfigError> {
        let api_keys = remote
            .api_keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(str::parse::<ApiKey>)
            .collect::<Result<Vec<_>, _>>()?;
        if api_keys.is_empty() {
            return Err(ConfigError::NoCredentials);
        }

        if flags.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if flags.index_only && flags.batch_size > 1 {
            return Err(ConfigError::IndexOnlyWithBatch(flags.batch_size));
        }
        if remote.per_page == 0 || remote.per_page > 500 {
            return Err(ConfigError::InvalidPerPage(remote.per_page));
        }

        let proxies: Vec<String> = remote
            .proxies
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if let Some(bad) = proxies.iter().find(|p| reqwest::Proxy::all(p.as_str()).is_err()) {
            return Err(ConfigError::InvalidProxy(bad.clone()));
        }

        let retry = RetryConfig {
            max_retries: remote.max_retries,
            base_delay: Duration::from_millis(remote.retry_delay_ms),
            max_delay: Duration::from_millis(remote.max_retry_delay_ms.max(remote.retry_delay_ms)),
            multiplier: 2.0,
            retry_statuses: if remote.retry_statuses.is_empty() {
                DEFAULT_RETRY_STATUSES.to_vec()
            } else {
                remote.retry_statuses
            },
        };

        Ok(Self {
            directory: expand_tilde(&flags.directory),
            api_keys,
            user_agents: remote.user_agents,
            proxies,
            api_base_url: remote.api_base_url,
            retry,
            timeout: Duration::from_secs(remote.timeout_secs),
            download_timeout: Duration::from_secs(flags.download_timeout_secs),
            batch_size: flags.batch_size,
            per_page: remote.per_page,
            options: SyncOptions {
                ignore_completed: flags.ignore_completed,
                distrust_timestamps: flags.distrust_timestamps,
                trust_photo_records: !flags.no_trust_photo_records,
                switch_identities: flags.switch_identities,
                index_only: flags.index_only,
            },
            no_progress_bar: flags.no_progress_bar,
        })
    }
}
