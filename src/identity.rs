//! Identity pool: which API key, user agent and proxy an outbound request
//! goes out with.
//!
//! Pools are shuffled once at construction. Pinned selection then always
//! hands out the first entry, randomized selection draws uniformly on every
//! call. Neither is security-sensitive, so `thread_rng` is fine.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng as _;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use thiserror::Error;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("No API keys configured; set PHOTOMIRROR_API_KEYS or pass --api-key")]
    NoCredentials,

    #[error("Invalid API key entry '{0}'")]
    InvalidCredential(String),

    #[error("Invalid proxy '{url}': {source}")]
    InvalidProxy { url: String, source: reqwest::Error },

    #[error("Invalid user agent '{0}'")]
    InvalidUserAgent(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// An API key. `Debug` never prints the key itself.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(4).collect();
        write!(f, "ApiKey({visible}…)")
    }
}

impl FromStr for ApiKey {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(IdentityError::InvalidCredential(s.to_string()));
        }
        Ok(Self(key.to_string()))
    }
}

/// Which kind of traffic an identity is for. API calls carry a key, CDN
/// fetches never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientProfile {
    Api,
    Cdn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Pinned,
    Randomized,
}

/// Transport settings for one HTTP client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HttpConfig {
    pub user_agent: String,
    pub proxy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub credential: Option<ApiKey>,
    pub http: HttpConfig,
}

#[derive(Debug)]
pub struct IdentityPool {
    credentials: Vec<ApiKey>,
    user_agents: Vec<String>,
    proxies: Vec<String>,
    mode: SelectionMode,
}

impl IdentityPool {
    pub fn new(
        mut credentials: Vec<ApiKey>,
        mut user_agents: Vec<String>,
        mut proxies: Vec<String>,
        mode: SelectionMode,
    ) -> Result<Self, IdentityError> {
        if credentials.is_empty() {
            return Err(IdentityError::NoCredentials);
        }
        user_agents.retain(|ua| !ua.trim().is_empty());
        if user_agents.is_empty() {
            user_agents.push(DEFAULT_USER_AGENT.to_string());
        }
        proxies.retain(|p| !p.trim().is_empty());

        let mut rng = rand::thread_rng();
        credentials.shuffle(&mut rng);
        user_agents.shuffle(&mut rng);
        proxies.shuffle(&mut rng);

        tracing::debug!(
            credentials = credentials.len(),
            user_agents = user_agents.len(),
            proxies = proxies.len(),
            ?mode,
            "Identity pool ready"
        );

        Ok(Self {
            credentials,
            user_agents,
            proxies,
            mode,
        })
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Pick an identity using the pool's own selection mode.
    pub fn next(&self, profile: ClientProfile) -> Identity {
        self.select(profile, self.mode)
    }

    /// Pick an identity with an explicit mode, overriding the pool default.
    pub fn select(&self, profile: ClientProfile, mode: SelectionMode) -> Identity {
        let credential = match profile {
            ClientProfile::Api => pick(&self.credentials, mode).cloned(),
            ClientProfile::Cdn => None,
        };
        let user_agent = pick(&self.user_agents, mode)
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let proxy = pick(&self.proxies, mode).cloned();

        Identity {
            credential,
            http: HttpConfig { user_agent, proxy },
        }
    }
}

fn pick<T>(items: &[T], mode: SelectionMode) -> Option<&T> {
    match (mode, items.len()) {
        (_, 0) => None,
        (SelectionMode::Pinned, _) | (_, 1) => items.first(),
        (SelectionMode::Randomized, n) => items.get(rand::thread_rng().gen_range(0..n)),
    }
}

/// One `reqwest::Client` per distinct [`HttpConfig`], built on first use.
///
/// Clients own their connection pools, so reusing them across requests with
/// the same identity keeps keep-alive connections warm.
pub struct ClientCache {
    connect_timeout: Duration,
    clients: Mutex<HashMap<HttpConfig, Client>>,
}

impl ClientCache {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, config: &HttpConfig) -> Result<Client, IdentityError> {
        if let Some(client) = self.lock().get(config) {
            return Ok(client.clone());
        }
        let client = self.build(config)?;
        self.lock().insert(config.clone(), client.clone());
        Ok(client)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<HttpConfig, Client>> {
        // A poisoned cache only ever holds fully built clients.
        self.clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn build(&self, config: &HttpConfig) -> Result<Client, IdentityError> {
        let mut headers = HeaderMap::new();
        let ua = HeaderValue::from_str(&config.user_agent)
            .map_err(|_| IdentityError::InvalidUserAgent(config.user_agent.clone()))?;
        headers.insert(USER_AGENT, ua);

        let mut builder = Client::builder()
            .default_headers(headers)
            .connect_timeout(self.connect_timeout);
        if let Some(url) = &config.proxy {
            let proxy = reqwest::Proxy::all(url).map_err(|source| IdentityError::InvalidProxy {
                url: url.clone(),
                source,
            })?;
            builder = builder.proxy(proxy);
        }
        builder.build().map_err(IdentityError::Client)
    }
}

impl fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCache")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}
